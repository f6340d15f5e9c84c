use utoipa::{
    Modify, OpenApi,
    openapi::{
        self,
        OpenApi as OpenApiSpec,
        security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    },
};
use utoipa_scalar::{Scalar, Servable};

use crate::{
    dto::{
        admin::{
            AdminOrderDetail, AdminOrderList, DailyOrderStats, DailyOrderStatsList,
            RevenueSummary, UpdateOrderStatusRequest, UpdateUserRequest, UserList,
        },
        auth::{AuthResponse, LoginRequest, RegisterRequest, UpdateProfileRequest},
        cart::{AddToCartRequest, CartItemDto, CartList, UpdateCartItemRequest},
        categories::{CategoryList, CategoryPayload, CategoryView},
        orders::{CheckoutRequest, OrderList, OrderWithItems},
        products::{ProductDetail, ProductList, ProductPayload},
        reviews::{CreateReviewRequest, ReviewList, ReviewView},
    },
    models::{CartItem, Category, Order, OrderItem, OrderStatus, Product, Review, User},
    response::{Acknowledged, Meta},
    routes::{admin, auth, cart, health, orders, params, products, reviews},
};

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        auth::register,
        auth::login,
        auth::profile,
        auth::update_profile,
        products::list_products,
        products::products_by_category,
        products::search_products,
        products::filter_by_price,
        products::list_categories,
        products::get_product,
        cart::cart_list,
        cart::add_to_cart,
        cart::update_cart_item,
        cart::remove_from_cart,
        cart::clear_cart,
        orders::checkout,
        orders::order_history,
        orders::get_order,
        reviews::product_reviews,
        reviews::add_review,
        reviews::get_review,
        admin::list_products,
        admin::create_product,
        admin::get_product,
        admin::update_product,
        admin::delete_product,
        admin::list_categories,
        admin::list_active_categories,
        admin::get_category,
        admin::create_category,
        admin::update_category,
        admin::delete_category,
        admin::toggle_category_status,
        admin::list_users,
        admin::get_user,
        admin::update_user,
        admin::toggle_user_status,
        admin::list_all_orders,
        admin::get_order_admin,
        admin::update_order_status,
        admin::list_reviews,
        admin::toggle_review_status,
        admin::delete_review,
        admin::revenue,
        admin::orders_by_date
    ),
    components(
        schemas(
            User,
            Category,
            Product,
            CartItem,
            Order,
            OrderItem,
            OrderStatus,
            Review,
            Meta,
            Acknowledged,
            RegisterRequest,
            LoginRequest,
            AuthResponse,
            UpdateProfileRequest,
            ProductPayload,
            ProductList,
            ProductDetail,
            CategoryPayload,
            CategoryView,
            CategoryList,
            AddToCartRequest,
            UpdateCartItemRequest,
            CartItemDto,
            CartList,
            CheckoutRequest,
            OrderWithItems,
            OrderList,
            CreateReviewRequest,
            ReviewView,
            ReviewList,
            UpdateOrderStatusRequest,
            UpdateUserRequest,
            UserList,
            AdminOrderDetail,
            AdminOrderList,
            RevenueSummary,
            DailyOrderStats,
            DailyOrderStatsList,
            params::Pagination,
            params::ProductQuery,
            params::OrderListQuery,
            params::DateRangeQuery
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check endpoint"),
        (name = "Auth", description = "Registration, login and profile"),
        (name = "Products", description = "Storefront catalog"),
        (name = "Cart", description = "Shopping cart of the current user"),
        (name = "Orders", description = "Checkout and order history"),
        (name = "Reviews", description = "Product reviews"),
        (name = "Admin", description = "Store administration"),
    )
)]
pub struct ApiDoc;

pub fn scalar_docs() -> Scalar<OpenApiSpec> {
    Scalar::with_url("/docs", ApiDoc::openapi())
}
