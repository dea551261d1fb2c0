pub mod assign_settings;
pub mod shipment;
pub mod stock_location;
pub mod stock_move;
