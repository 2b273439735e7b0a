pub(crate) mod blend;
pub(crate) mod blur;
pub(crate) mod buffer;
pub(crate) mod color_matrix;
pub(crate) mod noise;
pub(crate) mod operator;
