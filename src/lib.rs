extern crate byteorder;
extern crate encoding;
extern crate itertools;
#[macro_use] extern crate lazy_static;
#[macro_use] extern crate log;
extern crate regex;
extern crate thiserror;

pub mod shapefile;

pub use shapefile::{OpenOptions, ShapefileError, ShapefileSet};
