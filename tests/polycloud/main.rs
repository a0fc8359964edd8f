mod support;

mod cluster;
mod common;
mod mcis;
mod resource;
mod util;
