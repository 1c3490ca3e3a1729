pub(crate) mod composite;
pub(crate) mod span;
