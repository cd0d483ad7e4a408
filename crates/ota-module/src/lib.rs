//! Update-module execution for the OTA update client.
//!
//! An update module is an external executable that knows how to install
//! one payload type. The driver invokes it once per protocol state with
//! the state name and a work directory as arguments; payload bytes are
//! streamed to it through named pipes during the `Download` state.

mod discovery;
mod download;
mod error;
mod file_tree;
mod session;
mod state;

pub use discovery::discover_update_modules;
pub use error::ModuleError;
pub use file_tree::{delete_file_tree, prepare_file_tree};
pub use session::UpdateModule;
pub use state::{ModuleState, RebootAction};
