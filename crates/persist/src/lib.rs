//! kubedump output tree.
//!
//! Layout, rooted at a base directory:
//!
//! ```text
//! <ns>/<Kind>/<name>/<name>.yaml          description, rewritten whole on every change
//! <ns>/<Kind>/<name>/<name>.events        append-only event lines
//! <ns>/<Kind>/<name>/logs/<container>.log raw container log bytes
//! <ns>/<Kind>/<name>/<DepKind>/<dep>      relative symlink to a dependent's directory
//! kubedump.log                            process log
//! ```

#![forbid(unsafe_code)]

mod path;
mod tree;
mod write;

pub use path::ResourcePath;
pub use tree::{filter_tree, for_each_resource, TreeEntry};
pub use write::{append_event, create_link, event_line, write_description};

/// File name of the process log, a sibling of the namespace directories.
pub const PROCESS_LOG: &str = "kubedump.log";
