#[cfg(test)]
mod conv_tests;
