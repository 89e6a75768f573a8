mod dashboard;

pub use dashboard::{DashboardScreen, wrap_line};
