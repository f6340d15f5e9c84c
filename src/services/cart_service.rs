use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use crate::{
    audit,
    dto::cart::{AddToCartRequest, CartItemDto, CartList, UpdateCartItemRequest, line_total},
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{CartItem, Product},
    response::{Acknowledged, ApiResponse, Meta},
    state::AppState,
    validation::positive_quantity,
};

#[derive(FromRow)]
struct CartWithProductRow {
    cart_id: Uuid,
    quantity: i32,
    product_id: Uuid,
    category_id: Uuid,
    name: String,
    description: Option<String>,
    image_url: Option<String>,
    price: i64,
    stock: i32,
    is_active: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<CartWithProductRow> for CartItemDto {
    type Error = AppError;

    fn try_from(row: CartWithProductRow) -> AppResult<Self> {
        Ok(CartItemDto {
            id: row.cart_id,
            line_total: line_total(row.price, row.quantity)?,
            quantity: row.quantity,
            product: Product {
                id: row.product_id,
                category_id: row.category_id,
                name: row.name,
                description: row.description,
                image_url: row.image_url,
                price: row.price,
                stock: row.stock,
                is_active: row.is_active,
                created_at: row.created_at,
            },
        })
    }
}

pub async fn list_cart(state: &AppState, user: &AuthUser) -> AppResult<ApiResponse<CartList>> {
    let rows = sqlx::query_as::<_, CartWithProductRow>(
        r#"
        SELECT ci.id AS cart_id, ci.quantity,
               p.id AS product_id, p.category_id, p.name, p.description, p.image_url,
               p.price, p.stock, p.is_active, p.created_at
        FROM cart_items ci
        JOIN products p ON p.id = ci.product_id
        WHERE ci.user_id = $1
        ORDER BY ci.created_at DESC
        "#,
    )
    .bind(user.user_id)
    .fetch_all(&state.pool)
    .await?;

    let items = rows
        .into_iter()
        .map(CartItemDto::try_from)
        .collect::<AppResult<Vec<_>>>()?;
    let cart = CartList::from_items(items)?;
    let total = cart.items.len() as i64;
    Ok(ApiResponse::success("OK", cart, Some(Meta::new(1, total, total))))
}

/// Add `quantity` of a product; an existing line for the same product grows.
pub async fn add_to_cart(
    state: &AppState,
    user: &AuthUser,
    payload: AddToCartRequest,
) -> AppResult<ApiResponse<CartItem>> {
    positive_quantity(payload.quantity)?;

    let product: Option<(bool,)> = sqlx::query_as(
        r#"
        SELECT p.is_active AND c.is_active
        FROM products p
        JOIN categories c ON c.id = p.category_id
        WHERE p.id = $1
        "#,
    )
    .bind(payload.product_id)
    .fetch_optional(&state.pool)
    .await?;
    match product {
        None => return Err(AppError::NotFound),
        Some((false,)) => {
            return Err(AppError::BadRequest("product is not active".to_string()));
        }
        Some((true,)) => {}
    }

    let cart_item = sqlx::query_as::<_, CartItem>(
        r#"
        INSERT INTO cart_items (id, user_id, product_id, quantity)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (user_id, product_id)
        DO UPDATE SET quantity = cart_items.quantity + EXCLUDED.quantity
        WHERE cart_items.quantity <= $5 - EXCLUDED.quantity
        RETURNING id, user_id, product_id, quantity, created_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(user.user_id)
    .bind(payload.product_id)
    .bind(payload.quantity)
    .bind(i32::MAX)
    .fetch_optional(&state.pool)
    .await?
    // The conflict branch skips the update when the sum would not fit.
    .ok_or_else(|| AppError::BadRequest("quantity is too large".to_string()))?;

    audit::record(
        &state.pool,
        Some(user.user_id),
        "cart_add",
        "cart_items",
        serde_json::json!({ "product_id": payload.product_id, "quantity": payload.quantity }),
    )
    .await;

    Ok(ApiResponse::success("Added to cart", cart_item, None))
}

pub async fn update_quantity(
    state: &AppState,
    user: &AuthUser,
    cart_item_id: Uuid,
    payload: UpdateCartItemRequest,
) -> AppResult<ApiResponse<CartItem>> {
    positive_quantity(payload.quantity)?;

    let cart_item = sqlx::query_as::<_, CartItem>(
        r#"
        UPDATE cart_items
        SET quantity = $3
        WHERE id = $1 AND user_id = $2
        RETURNING id, user_id, product_id, quantity, created_at
        "#,
    )
    .bind(cart_item_id)
    .bind(user.user_id)
    .bind(payload.quantity)
    .fetch_optional(&state.pool)
    .await?
    .ok_or(AppError::NotFound)?;

    audit::record(
        &state.pool,
        Some(user.user_id),
        "cart_update",
        "cart_items",
        serde_json::json!({ "cart_item_id": cart_item_id, "quantity": payload.quantity }),
    )
    .await;

    Ok(ApiResponse::success("OK", cart_item, None))
}

pub async fn remove_from_cart(
    state: &AppState,
    user: &AuthUser,
    cart_item_id: Uuid,
) -> AppResult<ApiResponse<Acknowledged>> {
    let result = sqlx::query("DELETE FROM cart_items WHERE id = $1 AND user_id = $2")
        .bind(cart_item_id)
        .bind(user.user_id)
        .execute(&state.pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound);
    }

    audit::record(
        &state.pool,
        Some(user.user_id),
        "cart_remove",
        "cart_items",
        serde_json::json!({ "cart_item_id": cart_item_id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Item removed from cart",
        Acknowledged {
            id: Some(cart_item_id),
        },
        Some(Meta::empty()),
    ))
}

pub async fn clear_cart(state: &AppState, user: &AuthUser) -> AppResult<ApiResponse<Acknowledged>> {
    let result = sqlx::query("DELETE FROM cart_items WHERE user_id = $1")
        .bind(user.user_id)
        .execute(&state.pool)
        .await?;

    audit::record(
        &state.pool,
        Some(user.user_id),
        "cart_clear",
        "cart_items",
        serde_json::json!({ "removed": result.rows_affected() }),
    )
    .await;

    Ok(ApiResponse::success(
        "Cart cleared",
        Acknowledged { id: None },
        Some(Meta::empty()),
    ))
}
