mod common;

#[cfg(test)]
mod dex_resolution;
