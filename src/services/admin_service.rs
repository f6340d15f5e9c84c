use chrono::{NaiveDate, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, TransactionTrait,
};
use sea_orm::sea_query::{Expr, LockType};
use uuid::Uuid;

use crate::{
    audit,
    dto::admin::{
        AdminOrderDetail, AdminOrderList, DailyOrderStats, DailyOrderStatsList, RevenueSummary,
        UpdateOrderStatusRequest, UpdateUserRequest, UserList,
    },
    entity::{
        order_items::{Column as OrderItemCol, Entity as OrderItems},
        orders::{ActiveModel as OrderActive, Column as OrderCol, Entity as Orders},
        products::{Column as ProdCol, Entity as Products},
        users::{ActiveModel as UserActive, Column as UserCol, Entity as Users},
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::{Order, OrderStatus, ROLE_ADMIN, ROLE_CUSTOMER, User},
    response::{ApiResponse, Meta},
    routes::params::{DateRangeQuery, OrderListQuery, Pagination, SortOrder},
    services::order_service::{load_items, parse_status_filter},
    state::AppState,
    validation::{optional_text, required_text},
};

pub async fn list_all_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<AdminOrderList>> {
    ensure_admin(user)?;
    let (page, limit, offset) = query.pagination().normalize();

    let mut condition = Condition::all();
    if let Some(status) = parse_status_filter(query.status.as_deref())? {
        condition = condition.add(OrderCol::Status.eq(status.as_str()));
    }

    let mut finder = Orders::find().filter(condition);

    let sort_order = query.sort_order.unwrap_or(SortOrder::Desc);
    finder = match sort_order {
        SortOrder::Asc => finder.order_by_asc(OrderCol::CreatedAt),
        SortOrder::Desc => finder.order_by_desc(OrderCol::CreatedAt),
    };
    finder = finder.order_by_asc(OrderCol::Id);

    let total = finder.clone().count(&state.orm).await? as i64;

    let items = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(Order::from)
        .collect();

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success("Orders", AdminOrderList { items }, Some(meta)))
}

pub async fn get_order_admin(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<AdminOrderDetail>> {
    ensure_admin(user)?;
    let (order, customer) = Orders::find_by_id(id)
        .find_also_related(Users)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;

    let items = load_items(&state.orm, &[order.id])
        .await?
        .remove(&order.id)
        .unwrap_or_default();

    let data = AdminOrderDetail {
        order: order.into(),
        items,
        customer_email: customer.as_ref().map(|c| c.email.clone()),
        customer_name: customer.map(|c| c.full_name),
    };
    Ok(ApiResponse::success("Order found", data, Some(Meta::empty())))
}

/// Move an order to a new status. Cancelling puts every line's quantity back
/// into stock in the same transaction; a cancelled order is final.
pub async fn update_order_status(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateOrderStatusRequest,
) -> AppResult<ApiResponse<Order>> {
    ensure_admin(user)?;
    let next = OrderStatus::parse(&payload.status)
        .ok_or_else(|| AppError::BadRequest("Invalid order status".into()))?;
    let cancel_reason = optional_text("cancel_reason", payload.cancel_reason.as_deref(), 200)?;

    let txn = state.orm.begin().await?;

    let existing = Orders::find_by_id(id)
        .lock(LockType::Update)
        .one(&txn)
        .await?
        .ok_or(AppError::NotFound)?;

    let current = OrderStatus::parse(&existing.status).ok_or_else(|| {
        AppError::Internal(anyhow::anyhow!(
            "order {} has unknown status {}",
            existing.id,
            existing.status
        ))
    })?;
    if !current.can_transition_to(next) {
        return Err(AppError::BadRequest(
            "Cancelled orders cannot change status".into(),
        ));
    }

    if next == OrderStatus::Cancelled {
        let lines = OrderItems::find()
            .filter(OrderItemCol::OrderId.eq(existing.id))
            .order_by_asc(OrderItemCol::ProductId)
            .all(&txn)
            .await?;
        for line in &lines {
            Products::update_many()
                .col_expr(ProdCol::Stock, Expr::col(ProdCol::Stock).add(line.quantity))
                .filter(ProdCol::Id.eq(line.product_id))
                .exec(&txn)
                .await?;
        }
    }

    let previous = existing.status.clone();
    let mut active: OrderActive = existing.into();
    active.status = Set(next.as_str().to_string());
    active.cancel_reason = Set(match next {
        OrderStatus::Cancelled => cancel_reason,
        _ => None,
    });
    active.updated_at = Set(Utc::now().into());
    let order = active.update(&txn).await?;

    txn.commit().await?;

    tracing::info!(order_id = %order.id, from = %previous, to = %next, "order status changed");
    audit::record(
        &state.pool,
        Some(user.user_id),
        "order_status_update",
        "orders",
        serde_json::json!({ "order_id": order.id, "from": previous, "status": order.status }),
    )
    .await;

    Ok(ApiResponse::success(
        "Order status updated",
        Order::from(order),
        Some(Meta::empty()),
    ))
}

/// Customer accounts, newest first.
pub async fn list_users(
    state: &AppState,
    user: &AuthUser,
    pagination: Pagination,
) -> AppResult<ApiResponse<UserList>> {
    ensure_admin(user)?;
    let (page, limit, offset) = pagination.normalize();

    let finder = Users::find()
        .filter(UserCol::Role.eq(ROLE_CUSTOMER))
        .order_by_desc(UserCol::CreatedAt)
        .order_by_asc(UserCol::Id);

    let total = finder.clone().count(&state.orm).await? as i64;
    let items = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(User::from)
        .collect();

    Ok(ApiResponse::success(
        "Users",
        UserList { items },
        Some(Meta::new(page, limit, total)),
    ))
}

pub async fn get_user(state: &AppState, user: &AuthUser, id: Uuid) -> AppResult<ApiResponse<User>> {
    ensure_admin(user)?;
    let found = Users::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;
    Ok(ApiResponse::success("User found", User::from(found), None))
}

pub async fn update_user(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateUserRequest,
) -> AppResult<ApiResponse<User>> {
    ensure_admin(user)?;
    let full_name = required_text("full_name", &payload.full_name, 1, 100)?;
    let phone = optional_text("phone", payload.phone.as_deref(), 20)?;
    let address = optional_text("address", payload.address.as_deref(), 500)?;
    let role = payload.role.trim().to_lowercase();
    if role != ROLE_ADMIN && role != ROLE_CUSTOMER {
        return Err(AppError::BadRequest("Invalid role".into()));
    }

    let existing = Users::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;

    let mut active: UserActive = existing.into();
    active.full_name = Set(full_name);
    active.phone = Set(phone);
    active.address = Set(address);
    active.role = Set(role);
    let updated = active.update(&state.orm).await?;

    audit::record(
        &state.pool,
        Some(user.user_id),
        "user_update",
        "users",
        serde_json::json!({ "user_id": updated.id, "role": updated.role }),
    )
    .await;

    Ok(ApiResponse::success(
        "User updated",
        User::from(updated),
        Some(Meta::empty()),
    ))
}

pub async fn toggle_user_status(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<User>> {
    ensure_admin(user)?;
    if id == user.user_id {
        return Err(AppError::BadRequest(
            "You cannot change the status of your own account".into(),
        ));
    }

    let updated = sqlx::query_as::<_, User>(
        r#"
        UPDATE users SET is_active = NOT is_active
        WHERE id = $1
        RETURNING id, full_name, email, phone, address, role, is_active, created_at
        "#,
    )
    .bind(id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or(AppError::NotFound)?;

    audit::record(
        &state.pool,
        Some(user.user_id),
        "user_toggle_status",
        "users",
        serde_json::json!({ "user_id": updated.id, "is_active": updated.is_active }),
    )
    .await;

    Ok(ApiResponse::success(
        "User status updated",
        updated,
        Some(Meta::empty()),
    ))
}

/// Revenue of non-cancelled orders, optionally bounded by inclusive UTC days.
pub async fn revenue(
    state: &AppState,
    user: &AuthUser,
    query: DateRangeQuery,
) -> AppResult<ApiResponse<RevenueSummary>> {
    ensure_admin(user)?;
    check_range(query.start_date, query.end_date)?;

    let total_revenue: i64 = sqlx::query_scalar(
        r#"
        SELECT COALESCE(SUM(total_amount), 0)::BIGINT
        FROM orders
        WHERE status <> $1
          AND ($2::date IS NULL OR (created_at AT TIME ZONE 'UTC')::date >= $2)
          AND ($3::date IS NULL OR (created_at AT TIME ZONE 'UTC')::date <= $3)
        "#,
    )
    .bind(OrderStatus::Cancelled.as_str())
    .bind(query.start_date)
    .bind(query.end_date)
    .fetch_one(&state.pool)
    .await?;

    Ok(ApiResponse::success(
        "Revenue",
        RevenueSummary {
            total_revenue,
            start_date: query.start_date,
            end_date: query.end_date,
        },
        None,
    ))
}

pub async fn orders_by_date(
    state: &AppState,
    user: &AuthUser,
    query: DateRangeQuery,
) -> AppResult<ApiResponse<DailyOrderStatsList>> {
    ensure_admin(user)?;
    let (Some(start_date), Some(end_date)) = (query.start_date, query.end_date) else {
        return Err(AppError::BadRequest(
            "start_date and end_date are required".into(),
        ));
    };
    check_range(Some(start_date), Some(end_date))?;

    let items = sqlx::query_as::<_, DailyOrderStats>(
        r#"
        SELECT (created_at AT TIME ZONE 'UTC')::date AS date,
               COUNT(*) AS order_count,
               COALESCE(SUM(total_amount), 0)::BIGINT AS total_revenue
        FROM orders
        WHERE status <> $1
          AND (created_at AT TIME ZONE 'UTC')::date BETWEEN $2 AND $3
        GROUP BY 1
        ORDER BY 1
        "#,
    )
    .bind(OrderStatus::Cancelled.as_str())
    .bind(start_date)
    .bind(end_date)
    .fetch_all(&state.pool)
    .await?;

    Ok(ApiResponse::success(
        "Orders by date",
        DailyOrderStatsList { items },
        None,
    ))
}

fn check_range(start: Option<NaiveDate>, end: Option<NaiveDate>) -> AppResult<()> {
    match (start, end) {
        (Some(start), Some(end)) if start > end => Err(AppError::BadRequest(
            "start_date must not be after end_date".into(),
        )),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn range_rejects_start_after_end() {
        assert!(check_range(Some(day("2025-03-02")), Some(day("2025-03-01"))).is_err());
    }

    #[test]
    fn range_accepts_open_and_single_day_bounds() {
        assert!(check_range(None, None).is_ok());
        assert!(check_range(Some(day("2025-03-01")), None).is_ok());
        assert!(check_range(Some(day("2025-03-01")), Some(day("2025-03-01"))).is_ok());
    }
}
