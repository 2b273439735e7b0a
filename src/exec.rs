pub(crate) mod pipeline;
pub(crate) mod promise;
pub(crate) mod scheduler;
