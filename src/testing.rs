use std::cell::RefCell;
use std::io::{self, Cursor, Read, Write};
use std::rc::Rc;

/// In-memory stream: reads come from a fixed script, writes are collected.
pub struct Duplex {
    input: Cursor<Vec<u8>>,
    output: Rc<RefCell<Vec<u8>>>,
}

impl Duplex {
    pub fn new(input: Vec<u8>) -> (Self, Rc<RefCell<Vec<u8>>>) {
        let output = Rc::new(RefCell::new(Vec::new()));
        let duplex = Duplex {
            input: Cursor::new(input),
            output: output.clone(),
        };
        (duplex, output)
    }
}

impl Read for Duplex {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.input.read(buf)
    }
}

impl Write for Duplex {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.output.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
