pub mod assemble;
pub mod build_config;
pub mod color;
pub mod config;
pub mod error;
pub mod generate;
pub mod inject;
pub mod io;
pub mod ledger;
pub mod manifest;
pub mod paths;
pub mod product;
pub mod resolver;
pub mod template;
pub mod tokens;
pub mod workspace;

pub use build_config::{BuildConfig, BuildContext};
pub use error::{ErrorClass, ForgeError, Result};
pub use generate::{GeneratedPackage, Generator};
pub use ledger::Ledger;
pub use product::ProductId;
