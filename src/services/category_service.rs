use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DbErr, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    Set, SqlErr,
};
use sea_orm::sea_query::{Expr, Func};
use uuid::Uuid;

use crate::{
    audit,
    dto::categories::{CategoryList, CategoryPayload, CategoryView},
    entity::{
        categories::{ActiveModel, Column, Entity as Categories, Model as CategoryModel},
        products::{Column as ProdCol, Entity as Products},
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::Category,
    response::{Acknowledged, ApiResponse, Meta},
    state::AppState,
    validation::{optional_text, required_text},
};

const VIEW_SELECT: &str = r#"
    SELECT c.id, c.name, c.description, c.is_active, c.created_at, c.updated_at,
           COUNT(p.id) AS product_count
    FROM categories c
    LEFT JOIN products p ON p.category_id = c.id
"#;

/// Active categories for the storefront, by name.
pub async fn list_public_categories(state: &AppState) -> AppResult<ApiResponse<Vec<Category>>> {
    let items = Categories::find()
        .filter(Column::IsActive.eq(true))
        .order_by_asc(Column::Name)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(Category::from)
        .collect();
    Ok(ApiResponse::success("Categories", items, None))
}

pub async fn list_all_categories(
    state: &AppState,
    user: &AuthUser,
) -> AppResult<ApiResponse<CategoryList>> {
    ensure_admin(user)?;
    let items = sqlx::query_as::<_, CategoryView>(&format!(
        "{VIEW_SELECT} GROUP BY c.id ORDER BY c.created_at DESC"
    ))
    .fetch_all(&state.pool)
    .await?;
    let total = items.len() as i64;
    Ok(ApiResponse::success(
        "Categories",
        CategoryList { items },
        Some(Meta::new(1, total, total)),
    ))
}

pub async fn list_active_categories(
    state: &AppState,
    user: &AuthUser,
) -> AppResult<ApiResponse<CategoryList>> {
    ensure_admin(user)?;
    let items = sqlx::query_as::<_, CategoryView>(&format!(
        "{VIEW_SELECT} WHERE c.is_active GROUP BY c.id ORDER BY c.name ASC"
    ))
    .fetch_all(&state.pool)
    .await?;
    Ok(ApiResponse::success(
        "Active categories",
        CategoryList { items },
        None,
    ))
}

pub async fn get_category(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<CategoryView>> {
    ensure_admin(user)?;
    let view = sqlx::query_as::<_, CategoryView>(&format!(
        "{VIEW_SELECT} WHERE c.id = $1 GROUP BY c.id"
    ))
    .bind(id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or(AppError::NotFound)?;
    Ok(ApiResponse::success("Category", view, None))
}

pub async fn create_category(
    state: &AppState,
    user: &AuthUser,
    payload: CategoryPayload,
) -> AppResult<ApiResponse<CategoryView>> {
    ensure_admin(user)?;
    let name = required_text("name", &payload.name, 2, 100)?;
    let description = optional_text("description", payload.description.as_deref(), 500)?;

    if find_by_name(state, &name, None).await?.is_some() {
        return Err(AppError::BadRequest(
            "A category with this name already exists".into(),
        ));
    }

    let category = ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set(name),
        description: Set(description),
        is_active: Set(payload.is_active),
        created_at: Set(Utc::now().into()),
        updated_at: Set(None),
    }
    .insert(&state.orm)
    .await
    .map_err(|err| duplicate_name(err, "A category with this name already exists"))?;

    tracing::info!(category_id = %category.id, name = %category.name, "category created");
    audit::record(
        &state.pool,
        Some(user.user_id),
        "category_create",
        "categories",
        serde_json::json!({ "category_id": category.id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Category created",
        CategoryView::from_category(category.into(), 0),
        Some(Meta::empty()),
    ))
}

pub async fn update_category(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: CategoryPayload,
) -> AppResult<ApiResponse<CategoryView>> {
    ensure_admin(user)?;
    let name = required_text("name", &payload.name, 2, 100)?;
    let description = optional_text("description", payload.description.as_deref(), 500)?;

    let existing = Categories::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;

    if find_by_name(state, &name, Some(id)).await?.is_some() {
        return Err(AppError::BadRequest(
            "Another category with this name already exists".into(),
        ));
    }

    let mut active: ActiveModel = existing.into();
    active.name = Set(name);
    active.description = Set(description);
    active.is_active = Set(payload.is_active);
    active.updated_at = Set(Some(Utc::now().into()));
    let category = active
        .update(&state.orm)
        .await
        .map_err(|err| duplicate_name(err, "Another category with this name already exists"))?;

    let product_count = count_products(state, id).await?;

    audit::record(
        &state.pool,
        Some(user.user_id),
        "category_update",
        "categories",
        serde_json::json!({ "category_id": id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Category updated",
        CategoryView::from_category(category.into(), product_count),
        Some(Meta::empty()),
    ))
}

/// Hard delete; refused while any product still references the category.
pub async fn delete_category(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<Acknowledged>> {
    ensure_admin(user)?;
    let category = Categories::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;

    let product_count = count_products(state, id).await?;
    if product_count > 0 {
        return Err(AppError::BadRequest(format!(
            "Cannot delete category '{}' because it has {} product(s). \
             Remove the products first or deactivate the category instead.",
            category.name, product_count
        )));
    }

    Categories::delete_by_id(id).exec(&state.orm).await?;

    tracing::info!(category_id = %id, "category deleted");
    audit::record(
        &state.pool,
        Some(user.user_id),
        "category_delete",
        "categories",
        serde_json::json!({ "category_id": id, "name": category.name }),
    )
    .await;

    Ok(ApiResponse::success(
        "Category deleted",
        Acknowledged { id: Some(id) },
        Some(Meta::empty()),
    ))
}

pub async fn toggle_category_status(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<Category>> {
    ensure_admin(user)?;
    let existing = Categories::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;

    let next = !existing.is_active;
    let mut active: ActiveModel = existing.into();
    active.is_active = Set(next);
    active.updated_at = Set(Some(Utc::now().into()));
    let category = active.update(&state.orm).await?;

    audit::record(
        &state.pool,
        Some(user.user_id),
        "category_toggle",
        "categories",
        serde_json::json!({ "category_id": id, "is_active": next }),
    )
    .await;

    Ok(ApiResponse::success(
        "Category status updated",
        Category::from(category),
        Some(Meta::empty()),
    ))
}

/// The lower(name) unique index catches a concurrent create that passed `find_by_name`.
fn duplicate_name(err: DbErr, message: &str) -> AppError {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(_)) => AppError::BadRequest(message.into()),
        _ => AppError::OrmError(err),
    }
}

async fn find_by_name(
    state: &AppState,
    name: &str,
    exclude: Option<Uuid>,
) -> AppResult<Option<CategoryModel>> {
    let mut finder = Categories::find().filter(
        Expr::expr(Func::lower(Expr::col(Column::Name))).eq(name.to_lowercase()),
    );
    if let Some(id) = exclude {
        finder = finder.filter(Column::Id.ne(id));
    }
    Ok(finder.one(&state.orm).await?)
}

async fn count_products(state: &AppState, category_id: Uuid) -> AppResult<i64> {
    let count = Products::find()
        .filter(ProdCol::CategoryId.eq(category_id))
        .count(&state.orm)
        .await?;
    Ok(count as i64)
}
