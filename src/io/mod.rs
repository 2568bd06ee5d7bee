pub mod csv;
pub mod esri;
pub mod results;
