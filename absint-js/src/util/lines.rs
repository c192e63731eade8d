/// Maps byte offsets of a source text to 1-based line numbers.
#[derive(Clone, Debug)]
pub struct LineIndex {
  starts: Vec<usize>,
}

impl LineIndex {
  pub fn new(source: &str) -> LineIndex {
    let mut starts = vec![0];
    starts.extend(
      source
        .bytes()
        .enumerate()
        .filter(|(_, b)| *b == b'\n')
        .map(|(i, _)| i + 1),
    );
    LineIndex { starts }
  }

  pub fn line_of(&self, offset: usize) -> usize {
    match self.starts.binary_search(&offset) {
      Ok(i) => i + 1,
      Err(i) => i,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::LineIndex;

  #[test]
  fn offsets_map_to_lines() {
    let index = LineIndex::new("a\nbc\n\nd");
    assert_eq!(index.line_of(0), 1);
    assert_eq!(index.line_of(1), 1);
    assert_eq!(index.line_of(2), 2);
    assert_eq!(index.line_of(4), 2);
    assert_eq!(index.line_of(5), 3);
    assert_eq!(index.line_of(6), 4);
  }
}
