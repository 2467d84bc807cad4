pub mod chrome_engine;
pub mod engine;
pub mod session;

pub use chrome_engine::{ChromeEngine, ChromeFactory};
pub use engine::{ActionTarget, AutomationEngine, EngineFactory, Locator, PrimitiveOutcome, Selector};
pub use session::{wait_until, ActionPacing, SessionHandle, SessionState, WaitOutcome};
