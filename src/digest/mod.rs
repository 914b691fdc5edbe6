pub mod audit;
pub mod config;
pub mod fetch;
pub mod format;
pub mod gemini;
pub mod lock;
pub mod media;
pub mod paths;
pub mod prompt;
pub mod util;
pub mod window;
