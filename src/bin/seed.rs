use fashion_store_api::{
    config::AppConfig,
    db::{create_pool, run_migrations},
    models::{ROLE_ADMIN, ROLE_CUSTOMER},
    services::auth_service::hash_password,
};
use sqlx::PgPool;
use uuid::Uuid;

struct SeedProduct {
    name: &'static str,
    description: &'static str,
    price: i64,
    stock: i32,
}

const CATALOG: &[(&str, &str, &[SeedProduct])] = &[
    (
        "Men's Shirts",
        "Shirts, tees and polos for men",
        &[
            SeedProduct { name: "White Oxford Shirt", description: "Slim fit cotton shirt", price: 350_000, stock: 50 },
            SeedProduct { name: "Basic Crew Tee", description: "Everyday cotton t-shirt", price: 150_000, stock: 100 },
            SeedProduct { name: "Pique Polo", description: "Breathable knit polo", price: 250_000, stock: 75 },
        ],
    ),
    (
        "Women's Tops",
        "Blouses and tees for women",
        &[
            SeedProduct { name: "Oversized Tee", description: "Relaxed fit t-shirt", price: 180_000, stock: 60 },
            SeedProduct { name: "Classic White Blouse", description: "Office ready blouse", price: 320_000, stock: 45 },
        ],
    ),
    (
        "Men's Trousers",
        "Jeans and chinos for men",
        &[
            SeedProduct { name: "Slim Jeans", description: "Stretch denim, slim leg", price: 450_000, stock: 80 },
            SeedProduct { name: "Khaki Chinos", description: "Straight leg cotton chinos", price: 380_000, stock: 65 },
        ],
    ),
    (
        "Women's Trousers",
        "Jeans, trousers and shorts for women",
        &[
            SeedProduct { name: "Wide Leg Jeans", description: "High waist wide leg denim", price: 420_000, stock: 70 },
            SeedProduct { name: "Denim Shorts", description: "Summer denim shorts", price: 220_000, stock: 55 },
        ],
    ),
    (
        "Accessories",
        "Bags, belts and hats",
        &[
            SeedProduct { name: "Leather Handbag", description: "Genuine leather tote", price: 550_000, stock: 30 },
            SeedProduct { name: "Leather Belt", description: "Full grain leather belt", price: 280_000, stock: 40 },
            SeedProduct { name: "Baseball Cap", description: "Adjustable cotton cap", price: 180_000, stock: 50 },
        ],
    ),
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;

    let pool = create_pool(&config.database_url).await?;
    run_migrations(&pool).await?;

    seed_users(&pool).await?;
    seed_catalog(&pool).await?;

    println!("Seed completed");
    Ok(())
}

async fn table_is_empty(pool: &PgPool, table: &str) -> anyhow::Result<bool> {
    let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(pool)
        .await?;
    Ok(count == 0)
}

async fn seed_users(pool: &PgPool) -> anyhow::Result<()> {
    if !table_is_empty(pool, "users").await? {
        println!("Users already present, skipping");
        return Ok(());
    }

    let users = [
        ("Admin User", "admin@example.com", "admin123", ROLE_ADMIN),
        ("Customer One", "customer1@example.com", "customer123", ROLE_CUSTOMER),
        ("Customer Two", "customer2@example.com", "customer123", ROLE_CUSTOMER),
    ];

    for (full_name, email, password, role) in users {
        let password_hash = hash_password(password)?;
        sqlx::query(
            r#"
            INSERT INTO users (id, full_name, email, password_hash, role)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(full_name)
        .bind(email)
        .bind(password_hash)
        .bind(role)
        .execute(pool)
        .await?;
        println!("Created user {email} (role={role})");
    }
    Ok(())
}

async fn seed_catalog(pool: &PgPool) -> anyhow::Result<()> {
    let seed_categories = table_is_empty(pool, "categories").await?;
    let seed_products = table_is_empty(pool, "products").await?;
    if !seed_categories && !seed_products {
        println!("Catalog already present, skipping");
        return Ok(());
    }

    for &(category_name, category_description, products) in CATALOG {
        let category_id: Uuid = if seed_categories {
            sqlx::query_scalar(
                "INSERT INTO categories (id, name, description) VALUES ($1, $2, $3) RETURNING id",
            )
            .bind(Uuid::new_v4())
            .bind(category_name)
            .bind(category_description)
            .fetch_one(pool)
            .await?
        } else {
            match sqlx::query_scalar("SELECT id FROM categories WHERE LOWER(name) = LOWER($1)")
                .bind(category_name)
                .fetch_optional(pool)
                .await?
            {
                Some(id) => id,
                None => continue,
            }
        };

        if !seed_products {
            continue;
        }
        for product in products.iter() {
            sqlx::query(
                r#"
                INSERT INTO products (id, category_id, name, description, price, stock)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(category_id)
            .bind(product.name)
            .bind(product.description)
            .bind(product.price)
            .bind(product.stock)
            .execute(pool)
            .await?;
        }
        println!("Seeded category {category_name}");
    }
    Ok(())
}
