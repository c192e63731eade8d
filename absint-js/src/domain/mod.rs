pub mod object;
pub mod value;

#[cfg(test)]
mod tests;
