pub mod errors;

pub mod prelude {
    use crate::errors;
    pub type Result<T> = std::result::Result<T, errors::GatewayError>;
}

pub mod auth;
pub mod connection;
pub mod logger;
pub mod names;
pub mod registry;
pub mod resolvers;
pub mod routes;
pub mod subscriptions;
pub mod synthesizer;
