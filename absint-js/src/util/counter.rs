/// Monotonic id source. Ids are never reused within an analysis run.
#[derive(Clone, Debug)]
pub struct Counter {
  next: u32,
}

impl Counter {
  pub fn new(start: u32) -> Counter {
    Counter { next: start }
  }

  pub fn bump(&mut self) -> u32 {
    let id = self.next;
    self.next += 1;
    id
  }

  pub fn peek(&self) -> u32 {
    self.next
  }
}
