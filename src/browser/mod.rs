pub mod chrome;
pub mod driver;
pub mod locator;

pub use chrome::{ChromeDriver, ConnectionMode};
pub use driver::PageDriver;
pub use locator::Locator;
