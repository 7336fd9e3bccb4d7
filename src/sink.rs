use std::io::{self, Write};

/// Destination of generated assembly, one line at a time.
pub trait CodeSink {
    fn append(&mut self, line: &str) -> io::Result<()>;
}

impl CodeSink for String {
    fn append(&mut self, line: &str) -> io::Result<()> {
        self.push_str(line);
        self.push('\n');
        Ok(())
    }
}

#[derive(Debug)]
pub struct WriterSink<W: Write> {
    writer: W,
}

impl<W: Write> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> CodeSink for WriterSink<W> {
    fn append(&mut self, line: &str) -> io::Result<()> {
        writeln!(self.writer, "{}", line)
    }
}
