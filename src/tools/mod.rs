//! 工具层：Tool trait、注册表、带超时的执行器，以及浏览器边界（操作 / 读取）

pub mod browser;
pub mod executor;
pub mod registry;
pub mod schema;

pub use browser::{
    browser_registry, ActionResult, Actuator, BrowserDriver, BrowserSession, HttpBrowser,
    MockBrowser, PageInspector, ScrollDirection, SharedBrowser, TabId,
};
pub(crate) use browser::truncate_chars;
pub use executor::ToolExecutor;
pub use registry::{Tool, ToolRegistry};
pub use schema::schema_json;
