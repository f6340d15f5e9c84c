use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, RelationTrait, Set,
};
use sea_orm::sea_query::{Expr, LikeExpr};
use sea_orm::sea_query::extension::postgres::PgExpr;
use sea_orm::JoinType;
use uuid::Uuid;

use crate::{
    audit,
    dto::products::{ProductDetail, ProductList, ProductPayload},
    entity::{
        categories::{Column as CatCol, Entity as Categories},
        products::{self, ActiveModel, Column, Entity as Products},
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::{Category, Product},
    response::{Acknowledged, ApiResponse, Meta},
    routes::params::{ProductQuery, ProductSortBy, SortOrder},
    services::review_service,
    state::AppState,
    validation::{non_negative, optional_text, required_text},
};

/// Storefront listing: active products whose category is also active.
pub async fn list_products(
    state: &AppState,
    query: ProductQuery,
) -> AppResult<ApiResponse<ProductList>> {
    query_products(state, query, true).await
}

/// Admin listing: every product, including soft-deleted ones.
pub async fn list_all_products(
    state: &AppState,
    user: &AuthUser,
    query: ProductQuery,
) -> AppResult<ApiResponse<ProductList>> {
    ensure_admin(user)?;
    query_products(state, query, false).await
}

async fn query_products(
    state: &AppState,
    query: ProductQuery,
    only_active: bool,
) -> AppResult<ApiResponse<ProductList>> {
    let (page, limit, offset) = query.pagination().normalize();

    if let (Some(min), Some(max)) = (query.min_price, query.max_price) {
        if min > max {
            return Err(AppError::BadRequest(
                "min_price cannot be greater than max_price".into(),
            ));
        }
    }

    let mut condition = Condition::all();

    if only_active {
        condition = condition
            .add(Column::IsActive.eq(true))
            .add(CatCol::IsActive.eq(true));
    }

    if let Some(search) = query.q.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = contains_pattern(search);
        condition = condition.add(
            Condition::any()
                .add(
                    Expr::col((Products, Column::Name))
                        .ilike(LikeExpr::new(pattern.clone()).escape('\\')),
                )
                .add(
                    Expr::col((Products, Column::Description))
                        .ilike(LikeExpr::new(pattern).escape('\\')),
                ),
        );
    }

    if let Some(category_id) = query.category_id {
        condition = condition.add(Column::CategoryId.eq(category_id));
    }

    if let Some(min_price) = query.min_price {
        condition = condition.add(Column::Price.gte(min_price));
    }

    if let Some(max_price) = query.max_price {
        condition = condition.add(Column::Price.lte(max_price));
    }

    let sort_by = query.sort_by.unwrap_or(ProductSortBy::CreatedAt);
    let sort_order = query.sort_order.unwrap_or(SortOrder::Desc);
    let sort_col = match sort_by {
        ProductSortBy::CreatedAt => Column::CreatedAt,
        ProductSortBy::Price => Column::Price,
        ProductSortBy::Name => Column::Name,
    };

    let mut finder = Products::find()
        .join(JoinType::InnerJoin, products::Relation::Categories.def())
        .filter(condition);
    finder = match sort_order {
        SortOrder::Asc => finder.order_by_asc(sort_col),
        SortOrder::Desc => finder.order_by_desc(sort_col),
    };
    finder = finder.order_by_asc(Column::Id);

    let total = finder.clone().count(&state.orm).await? as i64;

    let items = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(Product::from)
        .collect();

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success("Products", ProductList { items }, Some(meta)))
}

/// `%term%` for a literal substring match; LIKE wildcards in `term` are escaped.
fn contains_pattern(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for ch in term.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}

/// Storefront detail: the product with its category and visible reviews.
pub async fn get_product(state: &AppState, id: Uuid) -> AppResult<ApiResponse<ProductDetail>> {
    let (product, category) = Products::find_by_id(id)
        .filter(Column::IsActive.eq(true))
        .find_also_related(Categories)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;
    if !category.as_ref().is_some_and(|c| c.is_active) {
        return Err(AppError::NotFound);
    }

    let reviews = review_service::active_reviews_for_product(state, id).await?;

    Ok(ApiResponse::success(
        "Product",
        ProductDetail {
            product: product.into(),
            category: category.map(Category::from),
            reviews,
        },
        None,
    ))
}

pub async fn get_product_admin(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<Product>> {
    ensure_admin(user)?;
    let product = Products::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;
    Ok(ApiResponse::success("Product", Product::from(product), None))
}

pub async fn create_product(
    state: &AppState,
    user: &AuthUser,
    payload: ProductPayload,
) -> AppResult<ApiResponse<Product>> {
    ensure_admin(user)?;
    let fields = validate_payload(state, payload).await?;

    let product = ActiveModel {
        id: Set(Uuid::new_v4()),
        category_id: Set(fields.category_id),
        name: Set(fields.name),
        description: Set(fields.description),
        image_url: Set(fields.image_url),
        price: Set(fields.price),
        stock: Set(fields.stock),
        is_active: Set(fields.is_active),
        created_at: Set(Utc::now().into()),
    }
    .insert(&state.orm)
    .await?;

    tracing::info!(product_id = %product.id, name = %product.name, "product created");
    audit::record(
        &state.pool,
        Some(user.user_id),
        "product_create",
        "products",
        serde_json::json!({ "product_id": product.id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Product created",
        Product::from(product),
        Some(Meta::empty()),
    ))
}

pub async fn update_product(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: ProductPayload,
) -> AppResult<ApiResponse<Product>> {
    ensure_admin(user)?;
    let existing = Products::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;
    let fields = validate_payload(state, payload).await?;

    let mut active: ActiveModel = existing.into();
    active.category_id = Set(fields.category_id);
    active.name = Set(fields.name);
    active.description = Set(fields.description);
    active.image_url = Set(fields.image_url);
    active.price = Set(fields.price);
    active.stock = Set(fields.stock);
    active.is_active = Set(fields.is_active);
    let product = active.update(&state.orm).await?;

    audit::record(
        &state.pool,
        Some(user.user_id),
        "product_update",
        "products",
        serde_json::json!({ "product_id": product.id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Updated",
        Product::from(product),
        Some(Meta::empty()),
    ))
}

/// Soft delete: the row stays for order history, but leaves the storefront.
pub async fn delete_product(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<Acknowledged>> {
    ensure_admin(user)?;
    let result = Products::update_many()
        .col_expr(Column::IsActive, Expr::value(false))
        .filter(Column::Id.eq(id))
        .exec(&state.orm)
        .await?;

    if result.rows_affected == 0 {
        return Err(AppError::NotFound);
    }

    audit::record(
        &state.pool,
        Some(user.user_id),
        "product_delete",
        "products",
        serde_json::json!({ "product_id": id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Product deleted successfully",
        Acknowledged { id: Some(id) },
        Some(Meta::empty()),
    ))
}

struct ProductFields {
    category_id: Uuid,
    name: String,
    description: Option<String>,
    image_url: Option<String>,
    price: i64,
    stock: i32,
    is_active: bool,
}

async fn validate_payload(state: &AppState, payload: ProductPayload) -> AppResult<ProductFields> {
    let name = required_text("name", &payload.name, 1, 200)?;
    let description = optional_text("description", payload.description.as_deref(), 1000)?;
    let image_url = optional_text("image_url", payload.image_url.as_deref(), 500)?;
    non_negative("price", payload.price)?;
    non_negative("stock", i64::from(payload.stock))?;

    let category_exists = Categories::find_by_id(payload.category_id)
        .one(&state.orm)
        .await?
        .is_some();
    if !category_exists {
        return Err(AppError::BadRequest("Category not found".into()));
    }

    Ok(ProductFields {
        category_id: payload.category_id,
        name,
        description,
        image_url,
        price: payload.price,
        stock: payload.stock,
        is_active: payload.is_active,
    })
}

#[cfg(test)]
mod tests {
    use super::contains_pattern;

    #[test]
    fn search_term_wildcards_are_escaped() {
        assert_eq!(contains_pattern("wool"), "%wool%");
        assert_eq!(contains_pattern("100%"), "%100\\%%");
        assert_eq!(contains_pattern("v_neck"), "%v\\_neck%");
        assert_eq!(contains_pattern("a\\b"), "%a\\\\b%");
    }
}
