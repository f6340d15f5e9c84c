use std::collections::HashMap;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, FromQueryResult,
    JoinType, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, RelationTrait, Set,
    TransactionTrait,
};
use sea_orm::sea_query::{Expr, LockType};
use uuid::Uuid;

use crate::{
    audit,
    dto::orders::{CheckoutRequest, OrderList, OrderWithItems},
    entity::{
        cart_items::{self, Column as CartCol, Entity as CartItems},
        order_items::{ActiveModel as OrderItemActive, Column as OrderItemCol, Entity as OrderItems},
        orders::{ActiveModel as OrderActive, Column as OrderCol, Entity as Orders},
        products::{Column as ProdCol, Entity as Products},
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{Order, OrderItem, OrderStatus},
    response::{ApiResponse, Meta},
    routes::params::{OrderListQuery, SortOrder},
    state::AppState,
    validation::required_text,
};

/// One cart row joined with the product it points at, as read under lock.
#[derive(Debug, Clone, FromQueryResult)]
pub struct CartLine {
    pub product_id: Uuid,
    pub quantity: i32,
    pub name: String,
    pub price: i64,
    pub stock: i32,
    pub is_active: bool,
    pub category_active: bool,
}

/// Check every line can be fulfilled and return the order total.
pub fn price_cart(lines: &[CartLine]) -> AppResult<i64> {
    if lines.is_empty() {
        return Err(AppError::BadRequest("Cart is empty".into()));
    }

    let mut total_amount: i64 = 0;
    for line in lines {
        if line.quantity <= 0 {
            return Err(AppError::BadRequest("Cart has invalid quantity".into()));
        }
        if !line.is_active || !line.category_active {
            return Err(AppError::BadRequest(format!(
                "Product {} is no longer available",
                line.name
            )));
        }
        if line.stock < line.quantity {
            return Err(AppError::BadRequest(format!(
                "Insufficient stock for product {}",
                line.name
            )));
        }
        total_amount = line
            .price
            .checked_mul(i64::from(line.quantity))
            .and_then(|amount| total_amount.checked_add(amount))
            .ok_or_else(|| AppError::BadRequest("Order total is too large".into()))?;
    }
    Ok(total_amount)
}

/// Turn the caller's cart into an order in a single transaction.
pub async fn checkout(
    state: &AppState,
    user: &AuthUser,
    payload: CheckoutRequest,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let shipping_address = required_text("shipping_address", &payload.shipping_address, 1, 200)?;
    let phone = required_text("phone", &payload.phone, 1, 20)?;
    let recipient_name = required_text("recipient_name", &payload.recipient_name, 1, 200)?;

    let txn = state.orm.begin().await?;

    // Locks the cart rows and their products until commit; ordering by product
    // keeps concurrent checkouts from deadlocking on shared products. The
    // category flag is read through a subquery so categories stay unlocked.
    let lines = CartItems::find()
        .select_only()
        .column(CartCol::ProductId)
        .column(CartCol::Quantity)
        .column_as(ProdCol::Name, "name")
        .column_as(ProdCol::Price, "price")
        .column_as(ProdCol::Stock, "stock")
        .column_as(ProdCol::IsActive, "is_active")
        .column_as(
            Expr::cust("(SELECT c.is_active FROM categories c WHERE c.id = products.category_id)"),
            "category_active",
        )
        .join(JoinType::InnerJoin, cart_items::Relation::Products.def())
        .filter(CartCol::UserId.eq(user.user_id))
        .order_by_asc(CartCol::ProductId)
        .lock(LockType::Update)
        .into_model::<CartLine>()
        .all(&txn)
        .await?;

    let total_amount = price_cart(&lines)?;

    let now = Utc::now();
    let order = OrderActive {
        id: Set(Uuid::new_v4()),
        user_id: Set(user.user_id),
        total_amount: Set(total_amount),
        status: Set(OrderStatus::Pending.as_str().into()),
        cancel_reason: Set(None),
        shipping_address: Set(shipping_address),
        phone: Set(phone),
        recipient_name: Set(recipient_name),
        created_at: Set(now.into()),
        updated_at: Set(now.into()),
    }
    .insert(&txn)
    .await?;

    let mut items: Vec<OrderItem> = Vec::with_capacity(lines.len());

    for line in &lines {
        let item = OrderItemActive {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            product_id: Set(line.product_id),
            quantity: Set(line.quantity),
            unit_price: Set(line.price),
            created_at: Set(now.into()),
        }
        .insert(&txn)
        .await?;

        let mut item = OrderItem::from(item);
        item.product_name = Some(line.name.clone());
        items.push(item);

        let updated = Products::update_many()
            .col_expr(ProdCol::Stock, Expr::col(ProdCol::Stock).sub(line.quantity))
            .filter(ProdCol::Id.eq(line.product_id))
            .filter(ProdCol::Stock.gte(line.quantity))
            .exec(&txn)
            .await?;
        if updated.rows_affected != 1 {
            // Dropping `txn` rolls back everything written so far.
            return Err(AppError::BadRequest(format!(
                "Insufficient stock for product {}",
                line.name
            )));
        }
    }

    CartItems::delete_many()
        .filter(CartCol::UserId.eq(user.user_id))
        .exec(&txn)
        .await?;

    txn.commit().await?;

    tracing::info!(
        order_id = %order.id,
        user_id = %user.user_id,
        total_amount,
        lines = items.len(),
        "checkout completed"
    );
    audit::record(
        &state.pool,
        Some(user.user_id),
        "checkout",
        "orders",
        serde_json::json!({ "order_id": order.id, "total_amount": total_amount }),
    )
    .await;

    Ok(ApiResponse::success(
        "Checkout success",
        OrderWithItems {
            order: order.into(),
            items,
        },
        Some(Meta::empty()),
    ))
}

/// The caller's order history, newest first, each order with its items.
pub async fn list_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    let (page, limit, offset) = query.pagination().normalize();
    let mut condition = Condition::all().add(OrderCol::UserId.eq(user.user_id));
    if let Some(status) = parse_status_filter(query.status.as_deref())? {
        condition = condition.add(OrderCol::Status.eq(status.as_str()));
    }

    let sort_order = query.sort_order.unwrap_or(SortOrder::Desc);

    let mut finder = Orders::find().filter(condition);
    finder = match sort_order {
        SortOrder::Asc => finder.order_by_asc(OrderCol::CreatedAt),
        SortOrder::Desc => finder.order_by_desc(OrderCol::CreatedAt),
    };
    finder = finder.order_by_asc(OrderCol::Id);

    let total = finder.clone().count(&state.orm).await? as i64;

    let orders = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?;

    let order_ids: Vec<Uuid> = orders.iter().map(|o| o.id).collect();
    let mut items_by_order = load_items(&state.orm, &order_ids).await?;

    let items = orders
        .into_iter()
        .map(|order| OrderWithItems {
            items: items_by_order.remove(&order.id).unwrap_or_default(),
            order: order.into(),
        })
        .collect();

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success("Ok", OrderList { items }, Some(meta)))
}

pub async fn get_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let order = Orders::find()
        .filter(
            Condition::all()
                .add(OrderCol::UserId.eq(user.user_id))
                .add(OrderCol::Id.eq(id)),
        )
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;

    let items = load_items(&state.orm, &[order.id])
        .await?
        .remove(&order.id)
        .unwrap_or_default();

    Ok(ApiResponse::success(
        "OK",
        OrderWithItems {
            order: Order::from(order),
            items,
        },
        Some(Meta::empty()),
    ))
}

/// Items of the given orders with product names, grouped by order id.
pub(crate) async fn load_items<C: ConnectionTrait>(
    conn: &C,
    order_ids: &[Uuid],
) -> AppResult<HashMap<Uuid, Vec<OrderItem>>> {
    let mut grouped: HashMap<Uuid, Vec<OrderItem>> = HashMap::new();
    if order_ids.is_empty() {
        return Ok(grouped);
    }

    let rows = OrderItems::find()
        .filter(OrderItemCol::OrderId.is_in(order_ids.iter().copied()))
        .order_by_asc(OrderItemCol::CreatedAt)
        .find_also_related(Products)
        .all(conn)
        .await?;

    for (item, product) in rows {
        let mut item = OrderItem::from(item);
        item.product_name = product.map(|p| p.name);
        grouped.entry(item.order_id).or_default().push(item);
    }
    Ok(grouped)
}

pub(crate) fn parse_status_filter(raw: Option<&str>) -> AppResult<Option<OrderStatus>> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(raw) => OrderStatus::parse(raw)
            .map(Some)
            .ok_or_else(|| AppError::BadRequest("Invalid order status".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(price: i64, quantity: i32, stock: i32) -> CartLine {
        CartLine {
            product_id: Uuid::new_v4(),
            quantity,
            name: "Denim Jacket".into(),
            price,
            stock,
            is_active: true,
            category_active: true,
        }
    }

    #[test]
    fn total_is_sum_of_price_times_quantity() {
        let total = price_cart(&[line(350_000, 2, 5), line(120_000, 1, 1)]).expect("total");
        assert_eq!(total, 820_000);
    }

    #[test]
    fn empty_cart_is_rejected() {
        let err = price_cart(&[]).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(msg) if msg == "Cart is empty"));
    }

    #[test]
    fn insufficient_stock_is_rejected() {
        let err = price_cart(&[line(100, 1, 10), line(100, 4, 3)]).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(msg) if msg.starts_with("Insufficient stock")));
    }

    #[test]
    fn inactive_product_is_rejected() {
        let mut inactive = line(100, 1, 10);
        inactive.is_active = false;
        assert!(price_cart(&[inactive]).is_err());
    }

    #[test]
    fn product_in_inactive_category_is_rejected() {
        let mut hidden = line(100, 1, 10);
        hidden.category_active = false;
        assert!(price_cart(&[hidden]).is_err());
    }

    #[test]
    fn overflowing_total_is_rejected() {
        assert!(price_cart(&[line(i64::MAX, 2, 10)]).is_err());
    }

    #[test]
    fn status_filter_accepts_blank_and_known_values() {
        assert_eq!(parse_status_filter(None).unwrap(), None);
        assert_eq!(parse_status_filter(Some("  ")).unwrap(), None);
        assert_eq!(
            parse_status_filter(Some("Shipped")).unwrap(),
            Some(OrderStatus::Shipped)
        );
        assert!(parse_status_filter(Some("paid")).is_err());
    }
}
