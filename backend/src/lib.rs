pub mod handlers;
pub mod monitor;
pub mod state;

pub use handlers::build_router;
pub use state::AppState;
