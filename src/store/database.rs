//! SeaORM-backed store (PostgreSQL in production, SQLite for local runs).

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::sea_query::{Expr, Func, NullOrdering, OnConflict, Query, SimpleExpr};
use sea_orm::{
    ActiveValue::Set, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, DbBackend,
    DbErr, EntityTrait, FromQueryResult, JoinType, Order, QueryFilter, QueryOrder, QuerySelect,
    RelationTrait, Select, Statement, TransactionTrait,
};
use tracing::{debug, instrument, warn};

use crate::entities::{assign_settings, shipment, stock_location, stock_move};
use crate::errors::ServiceError;
use crate::models::{
    AssignCursor, AssignSettings, CursorStep, DemandOrder, LocationId, LocationNode, MoveId, MoveState,
    ProductId, Shipment, ShipmentDirection, ShipmentId, ShipmentState, StockLevel, StockMove,
};
use crate::store::{CommitReport, LockProbe, ShipmentFilter, StockStore, StockWindow};

const MOVES_TABLE: &str = "stock_moves";

#[derive(Debug, Clone)]
pub struct SeaOrmStore {
    db: Arc<DatabaseConnection>,
    /// Seed for the settings row when it does not exist yet.
    defaults: AssignSettings,
}

impl SeaOrmStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            db,
            defaults: AssignSettings::default(),
        }
    }

    pub fn with_defaults(mut self, defaults: AssignSettings) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Shipment query carrying every predicate of the filter, unordered and unlimited.
    fn select(filter: &ShipmentFilter) -> Select<shipment::Entity> {
        let mut query = shipment::Entity::find()
            .filter(shipment::Column::Direction.eq(filter.direction.as_str()))
            .filter(
                shipment::Column::State.is_in(filter.states.iter().map(ShipmentState::as_str)),
            );
        if let Some(ids) = &filter.ids {
            query = query.filter(shipment::Column::Id.is_in(ids.clone()));
        }
        if !filter.warehouses.is_empty() {
            query = query.filter(shipment::Column::WarehouseId.is_in(filter.warehouses.clone()));
        }
        if let Some(since) = filter.updated_since {
            query = query.filter(shipment::Column::UpdatedAt.gte(since));
        }
        if let Some(after) = filter.id_after {
            query = query.filter(shipment::Column::Id.gt(after));
        }
        if let Some(up_to) = filter.id_up_to {
            query = query.filter(shipment::Column::Id.lte(up_to));
        }
        if let Some(products) = &filter.products {
            query = query.filter(
                shipment::Column::Id.in_subquery(
                    Query::select()
                        .column(stock_move::Column::ShipmentId)
                        .from(stock_move::Entity)
                        .and_where(stock_move::Column::ProductId.is_in(products.clone()))
                        .and_where(stock_move::Column::State.is_not_in([
                            MoveState::Cancel.as_str(),
                            MoveState::Done.as_str(),
                        ]))
                        .to_owned(),
                ),
            );
        }
        query
    }

    async fn ensure_settings<C: ConnectionTrait>(
        &self,
        conn: &C,
    ) -> Result<assign_settings::Model, DbErr> {
        if let Some(row) = assign_settings::Entity::find_by_id(assign_settings::SETTINGS_ROW_ID)
            .one(conn)
            .await?
        {
            return Ok(row);
        }
        let seed = assign_settings::ActiveModel {
            id: Set(assign_settings::SETTINGS_ROW_ID),
            try_wait_to_assign: Set(self.defaults.try_wait_to_assign),
            block_size: Set(self.defaults.block_size.and_then(|n| i32::try_from(n).ok())),
            repeat_blocks: Set(self.defaults.repeat_blocks.and_then(|n| i32::try_from(n).ok())),
            next_id: Set(self.defaults.cursor.next_id),
            last_id: Set(self.defaults.cursor.last_id),
        };
        // another process may seed the row concurrently
        assign_settings::Entity::insert(seed)
            .on_conflict(
                OnConflict::column(assign_settings::Column::Id)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(conn)
            .await?;
        debug!("seeded assignment settings");
        assign_settings::Entity::find_by_id(assign_settings::SETTINGS_ROW_ID)
            .one(conn)
            .await?
            .ok_or_else(|| DbErr::RecordNotFound("assign_settings".into()))
    }

    async fn write_cursor<C: ConnectionTrait>(
        &self,
        conn: &C,
        cursor: &AssignCursor,
    ) -> Result<(), DbErr> {
        self.ensure_settings(conn).await?;
        assign_settings::Entity::update_many()
            .col_expr(assign_settings::Column::NextId, Expr::value(cursor.next_id))
            .col_expr(assign_settings::Column::LastId, Expr::value(cursor.last_id))
            .filter(assign_settings::Column::Id.eq(assign_settings::SETTINGS_ROW_ID))
            .exec(conn)
            .await?;
        Ok(())
    }

    /// Per `(location, product)` sum of `quantity`, grouped on `location`.
    async fn sum_by(
        &self,
        query: Select<stock_move::Entity>,
        location: stock_move::Column,
    ) -> Result<Vec<(LocationId, ProductId, Decimal)>, DbErr> {
        query
            .select_only()
            .column(location)
            .column(stock_move::Column::ProductId)
            .column_as(stock_move::Column::Quantity.sum(), "quantity")
            .group_by(location)
            .group_by(stock_move::Column::ProductId)
            .into_tuple()
            .all(&*self.db)
            .await
    }
}

/// Compare-and-set of the cursor columns. `Ok(false)` when the stored
/// cursor is no longer `step.from`.
async fn step_cursor<C: ConnectionTrait>(conn: &C, step: &CursorStep) -> Result<bool, DbErr> {
    let updated = assign_settings::Entity::update_many()
        .col_expr(assign_settings::Column::NextId, Expr::value(step.to.next_id))
        .col_expr(assign_settings::Column::LastId, Expr::value(step.to.last_id))
        .filter(assign_settings::Column::Id.eq(assign_settings::SETTINGS_ROW_ID))
        .filter(assign_settings::Column::NextId.eq(step.from.next_id))
        .filter(assign_settings::Column::LastId.eq(step.from.last_id))
        .exec(conn)
        .await?;
    Ok(updated.rows_affected > 0)
}

/// Moves whose `date` falls inside the window; undated moves always count.
fn within(window: &StockWindow, date: SimpleExpr) -> Condition {
    let mut dated = Condition::all().add(Expr::expr(date.clone()).lte(window.end));
    if let Some(start) = window.start {
        dated = dated.add(Expr::expr(date.clone()).gte(start));
    }
    Condition::any()
        .add(Expr::expr(date).is_null())
        .add(dated)
}

fn stock_date() -> SimpleExpr {
    Func::coalesce([
        Expr::col((stock_move::Entity, stock_move::Column::EffectiveDate)).into(),
        Expr::col((stock_move::Entity, stock_move::Column::PlannedDate)).into(),
    ])
    .into()
}

/// Conditional `waiting -> assigned` transition. `Ok(false)` when the
/// shipment was no longer waiting.
async fn assign_shipment<C: ConnectionTrait>(conn: &C, id: ShipmentId) -> Result<bool, DbErr> {
    let updated = shipment::Entity::update_many()
        .col_expr(
            shipment::Column::State,
            Expr::value(ShipmentState::Assigned.as_str()),
        )
        .col_expr(shipment::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(shipment::Column::Id.eq(id))
        .filter(shipment::Column::State.eq(ShipmentState::Waiting.as_str()))
        .exec(conn)
        .await?;
    if updated.rows_affected == 0 {
        return Ok(false);
    }
    stock_move::Entity::update_many()
        .col_expr(
            stock_move::Column::State,
            Expr::value(MoveState::Assigned.as_str()),
        )
        .filter(stock_move::Column::ShipmentId.eq(id))
        .filter(stock_move::Column::State.eq(MoveState::Draft.as_str()))
        .exec(conn)
        .await?;
    Ok(true)
}

fn fold_levels(
    rows: impl IntoIterator<Item = (LocationId, ProductId, Decimal)>,
) -> Vec<StockLevel> {
    let mut levels: BTreeMap<(LocationId, ProductId), Decimal> = BTreeMap::new();
    for (location, product, quantity) in rows {
        *levels.entry((location, product)).or_default() += quantity;
    }
    levels
        .into_iter()
        .map(|((location, product), quantity)| StockLevel::new(location, product, quantity))
        .collect()
}

#[async_trait]
impl StockStore for SeaOrmStore {
    async fn locations(&self) -> Result<Vec<LocationNode>, ServiceError> {
        let rows = stock_location::Entity::find()
            .order_by_asc(stock_location::Column::Id)
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;
        rows.into_iter()
            .map(|row| LocationNode::try_from(row).map_err(ServiceError::db_error))
            .collect()
    }

    #[instrument(skip(self, products), fields(products = products.len()))]
    async fn stock_levels(
        &self,
        products: &[ProductId],
        window: &StockWindow,
    ) -> Result<Vec<StockLevel>, ServiceError> {
        if products.is_empty() {
            return Ok(Vec::new());
        }
        let done = stock_move::Entity::find()
            .filter(stock_move::Column::State.eq(MoveState::Done.as_str()))
            .filter(stock_move::Column::ProductId.is_in(products.to_vec()))
            .filter(within(window, stock_date()));

        let mut rows = self
            .sum_by(done.clone(), stock_move::Column::ToLocationId)
            .await
            .map_err(ServiceError::db_error)?;
        let outgoing = self
            .sum_by(done, stock_move::Column::FromLocationId)
            .await
            .map_err(ServiceError::db_error)?;
        rows.extend(
            outgoing
                .into_iter()
                .map(|(location, product, quantity)| (location, product, -quantity)),
        );

        if window.forecast {
            let incoming = stock_move::Entity::find()
                .join(JoinType::InnerJoin, stock_move::Relation::Shipment.def())
                .filter(shipment::Column::Direction.eq(ShipmentDirection::Inbound.as_str()))
                .filter(stock_move::Column::State.is_in([
                    MoveState::Draft.as_str(),
                    MoveState::Assigned.as_str(),
                ]))
                .filter(stock_move::Column::ProductId.is_in(products.to_vec()))
                .filter(within(
                    window,
                    Expr::col((stock_move::Entity, stock_move::Column::PlannedDate)).into(),
                ));
            rows.extend(
                self.sum_by(incoming, stock_move::Column::ToLocationId)
                    .await
                    .map_err(ServiceError::db_error)?,
            );
        }
        Ok(fold_levels(rows))
    }

    async fn reserved_levels(
        &self,
        products: &[ProductId],
    ) -> Result<Vec<StockLevel>, ServiceError> {
        if products.is_empty() {
            return Ok(Vec::new());
        }
        let held = stock_move::Entity::find()
            .join(JoinType::InnerJoin, stock_move::Relation::Shipment.def())
            .filter(shipment::Column::Direction.eq(ShipmentDirection::Outbound.as_str()))
            .filter(shipment::Column::State.eq(ShipmentState::Assigned.as_str()))
            .filter(stock_move::Column::State.ne(MoveState::Cancel.as_str()))
            .filter(stock_move::Column::ProductId.is_in(products.to_vec()));
        let rows = self
            .sum_by(held, stock_move::Column::FromLocationId)
            .await
            .map_err(ServiceError::db_error)?;
        Ok(fold_levels(rows))
    }

    #[instrument(skip(self, filter))]
    async fn shipments(&self, filter: &ShipmentFilter) -> Result<Vec<Shipment>, ServiceError> {
        let mut query = Self::select(filter);
        query = match filter.order {
            DemandOrder::Id => query.order_by_asc(shipment::Column::Id),
            DemandOrder::CreatedAt => query
                .order_by_asc(shipment::Column::CreatedAt)
                .order_by_asc(shipment::Column::Id),
            DemandOrder::PlannedDate => query
                .order_by_with_nulls(shipment::Column::PlannedDate, Order::Asc, NullOrdering::Last)
                .order_by_asc(shipment::Column::Id),
        };
        if let Some(limit) = filter.limit {
            query = query.limit(limit);
        }
        let headers = query.all(&*self.db).await.map_err(ServiceError::db_error)?;
        if headers.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<ShipmentId> = headers.iter().map(|h| h.id).collect();
        let mut moves_by_shipment: HashMap<ShipmentId, Vec<StockMove>> = HashMap::new();
        for row in stock_move::Entity::find()
            .filter(stock_move::Column::ShipmentId.is_in(ids))
            .order_by_asc(stock_move::Column::Id)
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)?
        {
            let mv = StockMove::try_from(row).map_err(ServiceError::db_error)?;
            if let Some(shipment_id) = mv.shipment_id {
                moves_by_shipment.entry(shipment_id).or_default().push(mv);
            }
        }

        headers
            .into_iter()
            .map(|header| {
                let moves = moves_by_shipment.remove(&header.id).unwrap_or_default();
                header.into_shipment(moves).map_err(ServiceError::db_error)
            })
            .collect()
    }

    async fn max_shipment_id(
        &self,
        filter: &ShipmentFilter,
    ) -> Result<Option<ShipmentId>, ServiceError> {
        let max: Option<Option<i64>> = Self::select(filter)
            .select_only()
            .column_as(shipment::Column::Id.max(), "max_id")
            .into_tuple()
            .one(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;
        Ok(max.flatten())
    }

    async fn moves(&self, ids: &[MoveId]) -> Result<Vec<StockMove>, ServiceError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        stock_move::Entity::find()
            .filter(stock_move::Column::Id.is_in(ids.to_vec()))
            .order_by_asc(stock_move::Column::Id)
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)?
            .into_iter()
            .map(|row| StockMove::try_from(row).map_err(ServiceError::db_error))
            .collect()
    }

    async fn load_settings(&self) -> Result<AssignSettings, ServiceError> {
        let row = self
            .ensure_settings(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;
        Ok(row.into())
    }

    async fn save_cursor(&self, cursor: &AssignCursor) -> Result<(), ServiceError> {
        self.write_cursor(&*self.db, cursor)
            .await
            .map_err(ServiceError::db_error)
    }

    async fn advance_cursor(&self, step: &CursorStep) -> Result<(), ServiceError> {
        self.ensure_settings(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;
        if !step_cursor(&*self.db, step)
            .await
            .map_err(ServiceError::db_error)?
        {
            return Err(ServiceError::CursorMoved(step.from));
        }
        Ok(())
    }

    #[instrument(skip(self, shipments), fields(shipments = shipments.len()))]
    async fn commit_assignments(
        &self,
        cursor: Option<&CursorStep>,
        shipments: &[ShipmentId],
    ) -> Result<CommitReport, ServiceError> {
        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;
        let mut report = CommitReport::default();

        // the settings row stays locked until commit, so a concurrent sweep
        // holding the same `from` waits here and then finds it moved
        if let Some(step) = cursor {
            self.ensure_settings(&txn)
                .await
                .map_err(ServiceError::db_error)?;
            if !step_cursor(&txn, step)
                .await
                .map_err(ServiceError::db_error)?
            {
                txn.rollback().await.map_err(ServiceError::db_error)?;
                return Err(ServiceError::CursorMoved(step.from));
            }
        }

        for &id in shipments {
            let savepoint = txn.begin().await.map_err(ServiceError::db_error)?;
            match assign_shipment(&savepoint, id).await {
                Ok(true) => {
                    savepoint.commit().await.map_err(ServiceError::db_error)?;
                    report.assigned.push(id);
                }
                Ok(false) => {
                    savepoint.rollback().await.map_err(ServiceError::db_error)?;
                    report.skipped.push(id);
                }
                Err(err) => {
                    let err = ServiceError::db_error(err);
                    if err.is_fatal() {
                        return Err(err);
                    }
                    warn!(shipment_id = id, error = %err, "assignment rolled back");
                    counter!("autoassign.commit.failed", 1);
                    savepoint.rollback().await.map_err(ServiceError::db_error)?;
                    report.failed.push((id, err.to_string()));
                }
            }
        }

        txn.commit().await.map_err(ServiceError::db_error)?;
        Ok(report)
    }
}

#[derive(Debug, FromQueryResult)]
struct LockRow {
    locked: bool,
}

/// Looks for conflicting locks on the moves table held by other sessions.
#[derive(Debug, Clone)]
pub struct PgLockProbe {
    db: Arc<DatabaseConnection>,
}

impl PgLockProbe {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl LockProbe for PgLockProbe {
    async fn moves_locked(&self) -> Result<bool, ServiceError> {
        if self.db.get_database_backend() != DbBackend::Postgres {
            return Ok(false);
        }
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"SELECT EXISTS (
                SELECT 1 FROM pg_locks l
                JOIN pg_class c ON c.oid = l.relation
                WHERE c.relname = $1
                  AND l.mode IN ('ShareRowExclusiveLock', 'ExclusiveLock', 'AccessExclusiveLock')
                  AND l.granted
                  AND l.pid <> pg_backend_pid()
            ) AS locked"#,
            [MOVES_TABLE.into()],
        );
        let row = LockRow::find_by_statement(stmt)
            .one(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;
        Ok(row.map_or(false, |r| r.locked))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn levels_fold_per_location_and_product() {
        let levels = fold_levels([
            (2, 100, dec!(5)),
            (2, 100, dec!(-2)),
            (3, 100, dec!(1)),
            (2, 200, dec!(4)),
        ]);
        assert_eq!(
            levels,
            vec![
                StockLevel::new(2, 100, dec!(3)),
                StockLevel::new(2, 200, dec!(4)),
                StockLevel::new(3, 100, dec!(1)),
            ]
        );
    }

    #[test]
    fn window_renders_into_the_where_clause() {
        use chrono::NaiveDate;
        use sea_orm::QueryTrait;
        let end = NaiveDate::from_ymd_opt(2024, 5, 10).unwrap();
        let start = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let window = StockWindow::on(end).with_start(Some(start));
        let sql = stock_move::Entity::find()
            .filter(within(&window, stock_date()))
            .build(DbBackend::Postgres)
            .to_string();
        assert!(sql.contains(
            r#"COALESCE("stock_moves"."effective_date", "stock_moves"."planned_date") IS NULL"#
        ));
        assert!(sql.contains("<= '2024-05-10'"));
        assert!(sql.contains(">= '2024-05-01'"));
    }

    #[test]
    fn filter_renders_id_range() {
        use sea_orm::QueryTrait;
        let sql = SeaOrmStore::select(&ShipmentFilter::waiting().id_range(10, 20, Some(5)))
            .build(DbBackend::Postgres)
            .to_string();
        assert!(sql.contains(r#""shipments"."id" > 10"#));
        assert!(sql.contains(r#""shipments"."id" <= 20"#));
        assert!(sql.contains("'waiting'"));
    }
}
