//! A GNU linker plugin for link-time optimisation. The linker offers each input file to us. We
//! claim the ones that contain compiler IR and tell the linker about their symbols. Once the
//! linker has resolved all symbols, we write the resolutions out, run the LTO backend on the
//! claimed files and hand the native objects that it produces back to the linker.

pub mod args;
pub(crate) mod backend;
pub mod claim;
pub mod error;
pub mod ffi;
pub(crate) mod fs;
pub mod host;
pub(crate) mod logging;
pub mod plugin_api;
pub mod registry;
pub(crate) mod resolution_file;
pub mod session;
pub mod symbol;
pub mod symbol_table;

pub(crate) use anyhow::bail;
pub(crate) use anyhow::ensure;

pub use args::Options;
pub use args::PassThrough;
pub use claim::InputFile;
pub use host::Host;
pub use host::HostHandle;
pub use host::ResolutionQuery;
pub use plugin_api::MessageLevel;
pub use resolution_file::write_resolutions;
pub use session::Session;
pub use symbol::Resolution;
pub use symbol::SlotId;
pub use symbol::SymbolKind;
pub use symbol::SymbolRecord;
pub use symbol::Visibility;
pub use symbol_table::SymbolTable;
