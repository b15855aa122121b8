mod devices;
mod health;
mod messages;
mod queue_admin;
mod routes;
mod servers;

pub use routes::api_routes;
