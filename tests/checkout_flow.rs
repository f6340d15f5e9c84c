use fashion_store_api::{
    config::JwtConfig,
    db::{create_pool, run_migrations},
    dto::{
        admin::UpdateOrderStatusRequest,
        auth::{LoginRequest, RegisterRequest},
        cart::{AddToCartRequest, UpdateCartItemRequest},
        categories::CategoryPayload,
        orders::CheckoutRequest,
        products::ProductPayload,
        reviews::CreateReviewRequest,
    },
    error::AppError,
    middleware::auth::AuthUser,
    models::{ROLE_ADMIN, ROLE_CUSTOMER},
    routes::params::{DateRangeQuery, OrderListQuery, ProductQuery, ProductSortBy, SortOrder},
    services::{
        admin_service, auth_service, cart_service, category_service, order_service,
        product_service, review_service,
    },
    state::AppState,
};
use uuid::Uuid;

// These flows need Postgres; they are skipped when no database is configured.
async fn setup_state() -> anyhow::Result<Option<AppState>> {
    let database_url = match std::env::var("TEST_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
    {
        Ok(url) => url,
        Err(_) => {
            eprintln!("Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run flow tests.");
            return Ok(None);
        }
    };

    let pool = create_pool(&database_url).await?;
    run_migrations(&pool).await?;

    let jwt = JwtConfig {
        secret: "flow-test-secret".into(),
        issuer: "fashion-store-api".into(),
        audience: "fashion-store-frontend".into(),
        expiration_minutes: 30,
    };
    Ok(Some(AppState::new(pool, jwt)))
}

fn unique(prefix: &str) -> String {
    format!("{prefix}-{}", &Uuid::new_v4().simple().to_string()[..12])
}

async fn register_customer(state: &AppState) -> anyhow::Result<AuthUser> {
    let resp = auth_service::register_user(
        state,
        RegisterRequest {
            full_name: "Flow Customer".into(),
            email: format!("{}@example.com", unique("customer")),
            password: "secret123".into(),
            phone: None,
        },
    )
    .await?;
    let user = resp.data.expect("auth data").user;
    assert_eq!(user.role, ROLE_CUSTOMER);
    Ok(AuthUser {
        user_id: user.id,
        role: user.role,
    })
}

async fn create_admin(state: &AppState) -> anyhow::Result<AuthUser> {
    let id = Uuid::new_v4();
    let password_hash = auth_service::hash_password("admin-pass")?;
    sqlx::query(
        "INSERT INTO users (id, full_name, email, password_hash, role) VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(id)
    .bind("Flow Admin")
    .bind(format!("{}@example.com", unique("admin")))
    .bind(password_hash)
    .bind(ROLE_ADMIN)
    .execute(&state.pool)
    .await?;
    Ok(AuthUser {
        user_id: id,
        role: ROLE_ADMIN.into(),
    })
}

async fn create_category(state: &AppState, admin: &AuthUser, name: &str) -> anyhow::Result<Uuid> {
    let category = category_service::create_category(
        state,
        admin,
        CategoryPayload {
            name: name.into(),
            description: Some("Sweaters and cardigans".into()),
            is_active: true,
        },
    )
    .await?
    .data
    .expect("category");
    Ok(category.id)
}

async fn create_product_in(
    state: &AppState,
    admin: &AuthUser,
    category_id: Uuid,
    name: &str,
    price: i64,
    stock: i32,
) -> anyhow::Result<Uuid> {
    let product = product_service::create_product(
        state,
        admin,
        ProductPayload {
            category_id,
            name: name.into(),
            description: None,
            image_url: None,
            price,
            stock,
            is_active: true,
        },
    )
    .await?
    .data
    .expect("product");
    Ok(product.id)
}

async fn create_product(
    state: &AppState,
    admin: &AuthUser,
    price: i64,
    stock: i32,
) -> anyhow::Result<Uuid> {
    let category_id = create_category(state, admin, &unique("Knitwear")).await?;
    create_product_in(state, admin, category_id, &unique("Merino Sweater"), price, stock).await
}

fn in_category(category_id: Uuid) -> ProductQuery {
    ProductQuery {
        category_id: Some(category_id),
        ..ProductQuery::default()
    }
}

async fn stock_of(state: &AppState, admin: &AuthUser, product_id: Uuid) -> anyhow::Result<i32> {
    let product = product_service::get_product_admin(state, admin, product_id)
        .await?
        .data
        .expect("product");
    Ok(product.stock)
}

fn checkout_request() -> CheckoutRequest {
    CheckoutRequest {
        shipping_address: "12 Market Street".into(),
        phone: "0900000000".into(),
        recipient_name: "Flow Customer".into(),
    }
}

#[tokio::test]
async fn checkout_moves_cart_into_order_and_cancel_restocks() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };

    let admin = create_admin(&state).await?;
    let customer = register_customer(&state).await?;
    let product_id = create_product(&state, &admin, 125_000, 5).await?;

    // Adding the same product twice grows one line.
    for quantity in [2, 1] {
        cart_service::add_to_cart(
            &state,
            &customer,
            AddToCartRequest {
                product_id,
                quantity,
            },
        )
        .await?;
    }
    let cart = cart_service::list_cart(&state, &customer)
        .await?
        .data
        .expect("cart");
    assert_eq!(cart.items.len(), 1);
    assert_eq!(cart.total_quantity, 3);
    assert_eq!(cart.total_amount, 375_000);

    let placed = order_service::checkout(&state, &customer, checkout_request())
        .await?
        .data
        .expect("order");
    assert_eq!(placed.order.total_amount, 375_000);
    assert_eq!(placed.order.status, "pending");
    assert_eq!(placed.items.len(), 1);
    assert_eq!(placed.items[0].unit_price, 125_000);
    assert_eq!(placed.items[0].quantity, 3);

    assert_eq!(stock_of(&state, &admin, product_id).await?, 2);
    let cart = cart_service::list_cart(&state, &customer)
        .await?
        .data
        .expect("cart");
    assert!(cart.items.is_empty());

    let again = order_service::checkout(&state, &customer, checkout_request()).await;
    assert!(matches!(again, Err(AppError::BadRequest(msg)) if msg == "Cart is empty"));

    // Someone else cannot see the order.
    let stranger = register_customer(&state).await?;
    let hidden = order_service::get_order(&state, &stranger, placed.order.id).await;
    assert!(matches!(hidden, Err(AppError::NotFound)));

    let history = order_service::list_orders(&state, &customer, OrderListQuery::default()).await?;
    assert_eq!(history.meta.and_then(|m| m.total), Some(1));
    let history = history.data.expect("history");
    assert!(history.items[0].items[0].product_name.is_some());

    let cancelled = admin_service::update_order_status(
        &state,
        &admin,
        placed.order.id,
        UpdateOrderStatusRequest {
            status: "Cancelled".into(),
            cancel_reason: Some("Customer changed their mind".into()),
        },
    )
    .await?
    .data
    .expect("order");
    assert_eq!(cancelled.status, "cancelled");
    assert_eq!(
        cancelled.cancel_reason.as_deref(),
        Some("Customer changed their mind")
    );
    assert_eq!(stock_of(&state, &admin, product_id).await?, 5);

    let reopened = admin_service::update_order_status(
        &state,
        &admin,
        placed.order.id,
        UpdateOrderStatusRequest {
            status: "shipped".into(),
            cancel_reason: None,
        },
    )
    .await;
    assert!(matches!(reopened, Err(AppError::BadRequest(_))));
    assert_eq!(stock_of(&state, &admin, product_id).await?, 5);

    Ok(())
}

#[tokio::test]
async fn checkout_with_insufficient_stock_writes_nothing() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };

    let admin = create_admin(&state).await?;
    let customer = register_customer(&state).await?;
    let product_id = create_product(&state, &admin, 80_000, 2).await?;

    let item = cart_service::add_to_cart(
        &state,
        &customer,
        AddToCartRequest {
            product_id,
            quantity: 1,
        },
    )
    .await?
    .data
    .expect("cart item");
    cart_service::update_quantity(
        &state,
        &customer,
        item.id,
        UpdateCartItemRequest { quantity: 3 },
    )
    .await?;

    let result = order_service::checkout(&state, &customer, checkout_request()).await;
    assert!(
        matches!(result, Err(AppError::BadRequest(msg)) if msg.starts_with("Insufficient stock"))
    );

    assert_eq!(stock_of(&state, &admin, product_id).await?, 2);
    let cart = cart_service::list_cart(&state, &customer)
        .await?
        .data
        .expect("cart");
    assert_eq!(cart.total_quantity, 3);
    let history = order_service::list_orders(&state, &customer, OrderListQuery::default()).await?;
    assert_eq!(history.meta.and_then(|m| m.total), Some(0));

    // Another customer's cart line is out of reach.
    let stranger = register_customer(&state).await?;
    let foreign = cart_service::remove_from_cart(&state, &stranger, item.id).await;
    assert!(matches!(foreign, Err(AppError::NotFound)));

    Ok(())
}

#[tokio::test]
async fn soft_deleted_product_cannot_be_bought_or_reviewed() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };

    let admin = create_admin(&state).await?;
    let customer = register_customer(&state).await?;
    let product_id = create_product(&state, &admin, 50_000, 10).await?;

    review_service::add_review(
        &state,
        &customer,
        CreateReviewRequest {
            product_id,
            rating: 5,
            comment: Some("Soft and warm".into()),
        },
    )
    .await?;
    let detail = product_service::get_product(&state, product_id)
        .await?
        .data
        .expect("detail");
    assert_eq!(detail.reviews.len(), 1);
    assert_eq!(detail.reviews[0].rating, 5);

    cart_service::add_to_cart(
        &state,
        &customer,
        AddToCartRequest {
            product_id,
            quantity: 1,
        },
    )
    .await?;
    product_service::delete_product(&state, &admin, product_id).await?;

    let result = order_service::checkout(&state, &customer, checkout_request()).await;
    assert!(matches!(result, Err(AppError::BadRequest(_))));

    let hidden = product_service::get_product(&state, product_id).await;
    assert!(matches!(hidden, Err(AppError::NotFound)));

    let add = cart_service::add_to_cart(
        &state,
        &customer,
        AddToCartRequest {
            product_id,
            quantity: 1,
        },
    )
    .await;
    assert!(matches!(add, Err(AppError::BadRequest(_))));

    let review = review_service::add_review(
        &state,
        &customer,
        CreateReviewRequest {
            product_id,
            rating: 4,
            comment: None,
        },
    )
    .await;
    assert!(matches!(review, Err(AppError::BadRequest(_))));

    Ok(())
}

#[tokio::test]
async fn login_and_statistics_round_trip() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };

    let email = format!("{}@example.com", unique("Login"));
    auth_service::register_user(
        &state,
        RegisterRequest {
            full_name: "Login Customer".into(),
            email: email.clone(),
            password: "secret123".into(),
            phone: Some("0911111111".into()),
        },
    )
    .await?;

    let duplicate = auth_service::register_user(
        &state,
        RegisterRequest {
            full_name: "Login Customer".into(),
            email: email.to_uppercase(),
            password: "secret123".into(),
            phone: None,
        },
    )
    .await;
    assert!(matches!(duplicate, Err(AppError::BadRequest(msg)) if msg == "Email already exists"));

    let wrong = auth_service::login_user(
        &state,
        LoginRequest {
            email: email.clone(),
            password: "not-it".into(),
        },
    )
    .await;
    assert!(matches!(wrong, Err(AppError::Unauthorized(_))));

    let login = auth_service::login_user(
        &state,
        LoginRequest {
            email: format!("  {}  ", email.to_uppercase()),
            password: "secret123".into(),
        },
    )
    .await?
    .data
    .expect("login");
    let claims = auth_service::decode_token(&state.jwt, &login.token)?;
    assert_eq!(claims.sub, login.user.id.to_string());

    let admin = create_admin(&state).await?;
    let product_id = create_product(&state, &admin, 10_000, 10).await?;
    let customer = AuthUser {
        user_id: login.user.id,
        role: login.user.role.clone(),
    };
    let before = admin_service::revenue(&state, &admin, DateRangeQuery::default())
        .await?
        .data
        .expect("revenue")
        .total_revenue;

    cart_service::add_to_cart(
        &state,
        &customer,
        AddToCartRequest {
            product_id,
            quantity: 2,
        },
    )
    .await?;
    order_service::checkout(&state, &customer, checkout_request()).await?;

    let after = admin_service::revenue(&state, &admin, DateRangeQuery::default())
        .await?
        .data
        .expect("revenue")
        .total_revenue;
    assert!(after >= 20_000, "revenue was {before} before and {after} after");

    let today = chrono::Utc::now().date_naive();
    let daily = admin_service::orders_by_date(
        &state,
        &admin,
        DateRangeQuery {
            start_date: Some(today),
            end_date: Some(today),
        },
    )
    .await?
    .data
    .expect("daily");
    assert!(daily.items.iter().any(|d| d.date == today && d.order_count >= 1));

    Ok(())
}

#[tokio::test]
async fn catalog_search_treats_wildcards_literally_and_sorts() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };

    let admin = create_admin(&state).await?;
    let category_id = create_category(&state, &admin, &unique("Outerwear")).await?;
    let parka = create_product_in(&state, &admin, category_id, "Parka 100% wool", 300_000, 3).await?;
    let trench = create_product_in(&state, &admin, category_id, "Trench coat", 200_000, 3).await?;
    let bomber = create_product_in(&state, &admin, category_id, "Bomber jacket", 200_000, 3).await?;

    let search = |q: &str| ProductQuery {
        q: Some(q.into()),
        ..in_category(category_id)
    };

    let all = product_service::list_products(&state, search("%")).await?;
    let all = all.data.expect("products");
    assert_eq!(all.items.len(), 1);
    assert_eq!(all.items[0].id, parka);

    let none = product_service::list_products(&state, search("_")).await?;
    assert!(none.data.expect("products").items.is_empty());

    let coat = product_service::list_products(&state, search("COAT")).await?;
    let coat = coat.data.expect("products");
    assert_eq!(coat.items.len(), 1);
    assert_eq!(coat.items[0].id, trench);

    let by_price = product_service::list_products(
        &state,
        ProductQuery {
            sort_by: Some(ProductSortBy::Price),
            sort_order: Some(SortOrder::Desc),
            ..in_category(category_id)
        },
    )
    .await?
    .data
    .expect("products");
    let ids: Vec<Uuid> = by_price.items.iter().map(|p| p.id).collect();
    assert_eq!(ids[0], parka);
    // Equal prices fall back to id order.
    let mut tied = vec![trench, bomber];
    tied.sort();
    assert_eq!(&ids[1..], tied.as_slice());

    let by_name = product_service::list_products(
        &state,
        ProductQuery {
            sort_by: Some(ProductSortBy::Name),
            sort_order: Some(SortOrder::Asc),
            ..in_category(category_id)
        },
    )
    .await?
    .data
    .expect("products");
    let ids: Vec<Uuid> = by_name.items.iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![bomber, parka, trench]);

    // Pages never repeat or skip a product.
    let mut paged = Vec::new();
    for page in 1..=3 {
        let resp = product_service::list_products(
            &state,
            ProductQuery {
                page: Some(page),
                per_page: Some(1),
                sort_by: Some(ProductSortBy::Price),
                ..in_category(category_id)
            },
        )
        .await?;
        assert_eq!(resp.meta.and_then(|m| m.total), Some(3));
        paged.extend(resp.data.expect("products").items.into_iter().map(|p| p.id));
    }
    paged.sort();
    let mut expected = vec![parka, trench, bomber];
    expected.sort();
    assert_eq!(paged, expected);

    Ok(())
}

#[tokio::test]
async fn category_rules_hold_for_names_products_and_visibility() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };

    let admin = create_admin(&state).await?;
    let name = unique("Denim");
    let category_id = create_category(&state, &admin, &name).await?;

    let duplicate = category_service::create_category(
        &state,
        &admin,
        CategoryPayload {
            name: name.to_uppercase(),
            description: None,
            is_active: true,
        },
    )
    .await;
    assert!(matches!(duplicate, Err(AppError::BadRequest(_))));

    let other_id = create_category(&state, &admin, &unique("Linen")).await?;
    let renamed = category_service::update_category(
        &state,
        &admin,
        other_id,
        CategoryPayload {
            name: format!("  {}  ", name.to_lowercase()),
            description: None,
            is_active: true,
        },
    )
    .await;
    assert!(matches!(renamed, Err(AppError::BadRequest(_))));

    let product_id =
        create_product_in(&state, &admin, category_id, &unique("Slim Jeans"), 90_000, 4).await?;
    let blocked = category_service::delete_category(&state, &admin, category_id).await;
    assert!(matches!(blocked, Err(AppError::BadRequest(msg)) if msg.contains("1 product(s)")));

    let visible = product_service::list_products(&state, in_category(category_id)).await?;
    assert_eq!(visible.meta.and_then(|m| m.total), Some(1));

    category_service::toggle_category_status(&state, &admin, category_id).await?;
    let hidden = product_service::list_products(&state, in_category(category_id)).await?;
    assert_eq!(hidden.meta.and_then(|m| m.total), Some(0));
    let admin_view =
        product_service::list_all_products(&state, &admin, in_category(category_id)).await?;
    assert_eq!(admin_view.meta.and_then(|m| m.total), Some(1));
    let detail = product_service::get_product(&state, product_id).await;
    assert!(matches!(detail, Err(AppError::NotFound)));

    category_service::delete_category(&state, &admin, other_id).await?;

    Ok(())
}

#[tokio::test]
async fn concurrent_category_creates_keep_one_name() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };

    let admin = create_admin(&state).await?;
    let name = unique("Swimwear");
    let payload = || CategoryPayload {
        name: name.clone(),
        description: None,
        is_active: true,
    };

    let (a, b, c) = tokio::join!(
        category_service::create_category(&state, &admin, payload()),
        category_service::create_category(&state, &admin, payload()),
        category_service::create_category(&state, &admin, payload()),
    );
    let results = [a, b, c];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(
        results
            .iter()
            .filter(|r| r.is_err())
            .all(|r| matches!(r, Err(AppError::BadRequest(_))))
    );

    Ok(())
}

#[tokio::test]
async fn cart_lines_stay_owned_and_bounded() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };

    let admin = create_admin(&state).await?;
    let customer = register_customer(&state).await?;
    let stranger = register_customer(&state).await?;

    let product_id = create_product(&state, &admin, 1_000, 10).await?;
    let item = cart_service::add_to_cart(
        &state,
        &customer,
        AddToCartRequest {
            product_id,
            quantity: i32::MAX,
        },
    )
    .await?
    .data
    .expect("cart item");

    let overflow = cart_service::add_to_cart(
        &state,
        &customer,
        AddToCartRequest {
            product_id,
            quantity: 1,
        },
    )
    .await;
    assert!(matches!(overflow, Err(AppError::BadRequest(msg)) if msg.contains("too large")));

    let foreign = cart_service::update_quantity(
        &state,
        &stranger,
        item.id,
        UpdateCartItemRequest { quantity: 1 },
    )
    .await;
    assert!(matches!(foreign, Err(AppError::NotFound)));

    let cart = cart_service::list_cart(&state, &customer)
        .await?
        .data
        .expect("cart");
    assert_eq!(cart.items[0].quantity, i32::MAX);
    assert_eq!(cart.total_amount, i64::from(i32::MAX) * 1_000);

    // A line whose total does not fit in i64 is refused instead of wrapping.
    let pricey = create_product(&state, &admin, 5_000_000_000_000, 10).await?;
    cart_service::add_to_cart(
        &state,
        &stranger,
        AddToCartRequest {
            product_id: pricey,
            quantity: 2_000_000,
        },
    )
    .await?;
    let too_big = cart_service::list_cart(&state, &stranger).await;
    assert!(matches!(too_big, Err(AppError::BadRequest(_))));

    Ok(())
}
