//! Messages exchanged between the pipeline threads.

/// One newline-aligned slice of the input stream.
#[derive(Debug)]
pub struct Block {
    /// Sequence number assigned by the reader, starting at 0.
    pub seq: u64,
    pub data: Vec<u8>,
    /// Last block of the stream. Its worker writes out every open request.
    pub terminal: bool,
}

/// Reader → worker.
#[derive(Debug)]
pub enum WorkItem {
    Block(Block),
    /// End of input; one is sent per worker.
    Exit,
}

/// Worker → writer.
#[derive(Debug)]
pub enum WriterItem {
    Buffer(Vec<u8>),
    /// A worker has finished; the writer stops after one per worker.
    Exit,
}
