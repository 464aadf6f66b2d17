pub(crate) mod import;
pub(crate) mod list;
pub(crate) mod minimize;
pub(crate) mod show;
