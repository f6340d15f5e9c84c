use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::Product,
};

#[derive(Debug, Deserialize, ToSchema)]
pub struct AddToCartRequest {
    pub product_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateCartItemRequest {
    pub quantity: i32,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CartList {
    pub items: Vec<CartItemDto>,
    pub total_quantity: i64,
    pub total_amount: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CartItemDto {
    pub id: Uuid,
    pub product: Product,
    pub quantity: i32,
    pub line_total: i64,
}

/// `price * quantity`, refusing amounts that do not fit in an `i64`.
pub fn line_total(price: i64, quantity: i32) -> AppResult<i64> {
    price
        .checked_mul(i64::from(quantity))
        .ok_or_else(|| AppError::BadRequest("Cart total is too large".into()))
}

impl CartList {
    pub fn from_items(items: Vec<CartItemDto>) -> AppResult<Self> {
        let too_large = || AppError::BadRequest("Cart total is too large".into());
        let total_quantity = items
            .iter()
            .try_fold(0i64, |acc, item| acc.checked_add(i64::from(item.quantity)))
            .ok_or_else(too_large)?;
        let total_amount = items
            .iter()
            .try_fold(0i64, |acc, item| acc.checked_add(item.line_total))
            .ok_or_else(too_large)?;
        Ok(Self {
            items,
            total_quantity,
            total_amount,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;

    fn item(price: i64, quantity: i32) -> CartItemDto {
        CartItemDto {
            id: Uuid::new_v4(),
            product: Product {
                id: Uuid::new_v4(),
                category_id: Uuid::new_v4(),
                name: "Linen Shirt".into(),
                description: None,
                image_url: None,
                price,
                stock: 10,
                is_active: true,
                created_at: Utc::now(),
            },
            quantity,
            line_total: line_total(price, quantity).expect("line total"),
        }
    }

    #[test]
    fn totals_sum_every_line() {
        let cart = CartList::from_items(vec![item(250_000, 2), item(99_000, 1)]).expect("cart");
        assert_eq!(cart.total_quantity, 3);
        assert_eq!(cart.total_amount, 599_000);
    }

    #[test]
    fn empty_cart_has_zero_totals() {
        let cart = CartList::from_items(Vec::new()).expect("cart");
        assert_eq!(cart.total_quantity, 0);
        assert_eq!(cart.total_amount, 0);
    }

    #[test]
    fn oversized_line_is_rejected() {
        let err = line_total(5_000_000_000_000, 2_000_000).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(msg) if msg == "Cart total is too large"));
    }

    #[test]
    fn overflowing_cart_total_is_rejected() {
        let huge = item(i64::MAX / 2 + 1, 1);
        let also_huge = item(i64::MAX / 2 + 1, 1);
        assert!(CartList::from_items(vec![huge, also_huge]).is_err());
    }
}
