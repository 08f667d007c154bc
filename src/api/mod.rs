pub mod analytics;
pub mod routes;

pub use routes::create_api_router;
