pub mod excerpt;
pub mod indent;
pub mod metadata;

pub use excerpt::WriteOutcome;
pub use indent::{restore_indent, strip_indent, IndentInfo, IndentPolicy, Stripped};
pub use metadata::{NodeMetadata, SidecarStyle, Status};
