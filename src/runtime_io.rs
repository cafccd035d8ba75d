/// Output sink for `print`, so the VM stays independent of the process
/// environment.
pub trait RuntimeIo {
    fn write_line(&mut self, s: &str);
    fn write(&mut self, s: &str);
}

/// Writes to process stdout (CLI use).
pub struct StdIo;

impl RuntimeIo for StdIo {
    fn write_line(&mut self, s: &str) {
        println!("{}", s);
    }
    fn write(&mut self, s: &str) {
        use std::io::Write;
        print!("{}", s);
        let _ = std::io::stdout().flush();
    }
}

/// Accumulates output in memory; used by tests and by the e2e runner to
/// compare static and dynamic runs.
#[derive(Default)]
pub struct BufferIo {
    output: String,
}

impl BufferIo {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn take_output(self) -> String {
        self.output
    }
    pub fn get_output(&self) -> &str {
        &self.output
    }
    pub fn drain_output(&mut self) -> String {
        std::mem::take(&mut self.output)
    }
}

impl RuntimeIo for BufferIo {
    fn write_line(&mut self, s: &str) {
        self.output.push_str(s);
        self.output.push('\n');
    }
    fn write(&mut self, s: &str) {
        self.output.push_str(s);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_collects_lines() {
        let mut io = BufferIo::new();
        io.write("a");
        io.write_line("b");
        assert_eq!(io.drain_output(), "ab\n");
        io.write_line("c");
        assert_eq!(io.take_output(), "c\n");
    }
}
