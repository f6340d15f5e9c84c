use chrono::Utc;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use uuid::Uuid;

use crate::{
    audit,
    dto::reviews::{CreateReviewRequest, ReviewList, ReviewView},
    entity::reviews::{ActiveModel as ReviewActive, Entity as Reviews},
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::Review,
    response::{Acknowledged, ApiResponse, Meta},
    routes::params::Pagination,
    state::AppState,
    validation::optional_text,
};

const VIEW_SELECT: &str = r#"
    SELECT r.id, r.product_id, p.name AS product_name, r.user_id, u.full_name AS user_name,
           r.rating, r.comment, r.is_active, r.created_at
    FROM reviews r
    JOIN products p ON p.id = r.product_id
    JOIN users u ON u.id = r.user_id
"#;

pub async fn active_reviews_for_product(
    state: &AppState,
    product_id: Uuid,
) -> AppResult<Vec<ReviewView>> {
    let items = sqlx::query_as::<_, ReviewView>(&format!(
        "{VIEW_SELECT} WHERE r.product_id = $1 AND r.is_active ORDER BY r.created_at DESC"
    ))
    .bind(product_id)
    .fetch_all(&state.pool)
    .await?;
    Ok(items)
}

pub async fn list_product_reviews(
    state: &AppState,
    product_id: Uuid,
) -> AppResult<ApiResponse<ReviewList>> {
    let items = active_reviews_for_product(state, product_id).await?;
    Ok(ApiResponse::success("Reviews", ReviewList { items }, None))
}

pub async fn get_review(state: &AppState, id: Uuid) -> AppResult<ApiResponse<ReviewView>> {
    let review = sqlx::query_as::<_, ReviewView>(&format!("{VIEW_SELECT} WHERE r.id = $1"))
        .bind(id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or(AppError::NotFound)?;
    Ok(ApiResponse::success("Review", review, None))
}

pub async fn add_review(
    state: &AppState,
    user: &AuthUser,
    payload: CreateReviewRequest,
) -> AppResult<ApiResponse<Review>> {
    if !(1..=5).contains(&payload.rating) {
        return Err(AppError::BadRequest("rating must be between 1 and 5".into()));
    }
    let comment = optional_text("comment", payload.comment.as_deref(), 1000)?;

    let product: Option<(bool,)> = sqlx::query_as("SELECT is_active FROM products WHERE id = $1")
        .bind(payload.product_id)
        .fetch_optional(&state.pool)
        .await?;
    match product {
        None => return Err(AppError::NotFound),
        Some((false,)) => {
            return Err(AppError::BadRequest("product is not available".into()));
        }
        Some((true,)) => {}
    }

    let review = ReviewActive {
        id: Set(Uuid::new_v4()),
        product_id: Set(payload.product_id),
        user_id: Set(user.user_id),
        rating: Set(payload.rating),
        comment: Set(comment),
        is_active: Set(true),
        created_at: Set(Utc::now().into()),
    }
    .insert(&state.orm)
    .await
    .map(Review::from)?;

    audit::record(
        &state.pool,
        Some(user.user_id),
        "review_create",
        "reviews",
        serde_json::json!({ "review_id": review.id, "product_id": review.product_id }),
    )
    .await;

    Ok(ApiResponse::success("Review added", review, Some(Meta::empty())))
}

pub async fn list_all_reviews(
    state: &AppState,
    user: &AuthUser,
    pagination: Pagination,
) -> AppResult<ApiResponse<ReviewList>> {
    ensure_admin(user)?;
    let (page, limit, offset) = pagination.normalize();

    let items = sqlx::query_as::<_, ReviewView>(&format!(
        "{VIEW_SELECT} ORDER BY r.created_at DESC LIMIT $1 OFFSET $2"
    ))
    .bind(limit)
    .bind(offset)
    .fetch_all(&state.pool)
    .await?;

    let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM reviews")
        .fetch_one(&state.pool)
        .await?;

    Ok(ApiResponse::success(
        "Reviews",
        ReviewList { items },
        Some(Meta::new(page, limit, total.0)),
    ))
}

pub async fn toggle_review_status(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<Review>> {
    ensure_admin(user)?;
    let review = sqlx::query_as::<_, Review>(
        r#"
        UPDATE reviews SET is_active = NOT is_active
        WHERE id = $1
        RETURNING id, product_id, user_id, rating, comment, is_active, created_at
        "#,
    )
    .bind(id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or(AppError::NotFound)?;

    audit::record(
        &state.pool,
        Some(user.user_id),
        "review_toggle",
        "reviews",
        serde_json::json!({ "review_id": id, "is_active": review.is_active }),
    )
    .await;

    Ok(ApiResponse::success(
        "Review status updated successfully",
        review,
        Some(Meta::empty()),
    ))
}

pub async fn delete_review(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<Acknowledged>> {
    ensure_admin(user)?;
    let result = Reviews::delete_by_id(id).exec(&state.orm).await?;

    if result.rows_affected == 0 {
        return Err(AppError::NotFound);
    }

    audit::record(
        &state.pool,
        Some(user.user_id),
        "review_delete",
        "reviews",
        serde_json::json!({ "review_id": id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Review deleted",
        Acknowledged { id: Some(id) },
        Some(Meta::empty()),
    ))
}
