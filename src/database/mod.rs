pub mod models;
pub mod postgres;
pub mod schema;

pub use self::postgres::PostgresManager;
pub use self::schema::WriteDisposition;
