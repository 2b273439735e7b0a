pub(crate) mod descriptor;
pub(crate) mod extension;
pub(crate) mod result;
pub(crate) mod step;
