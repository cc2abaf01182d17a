//! Buffers exchanged with a stream.

/// A unit of work submitted to an entry point.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DataInput {
    /// Opaque payload; its encoding belongs to the graph.
    pub data: Vec<u8>,

    /// Caller-chosen fragment number, carried through to the output.
    pub fragment_id: i32,

    /// Caller-chosen free-form parameter, carried through to the output.
    pub custom_param: String,
}

impl DataInput {
    /// Create an input from raw bytes.
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            fragment_id: 0,
            custom_param: String::new(),
        }
    }

    pub fn with_fragment_id(mut self, fragment_id: i32) -> Self {
        self.fragment_id = fragment_id;
        self
    }

    pub fn with_custom_param(mut self, custom_param: impl Into<String>) -> Self {
        self.custom_param = custom_param.into();
        self
    }

    /// Create from a raw pointer (for FFI).
    ///
    /// # Safety
    /// `ptr` must be valid for reads of `len` bytes, or null with `len == 0`.
    pub unsafe fn from_raw(ptr: *const u8, len: usize) -> Option<Self> {
        if ptr.is_null() {
            return (len == 0).then(Self::default);
        }
        Some(Self::new(std::slice::from_raw_parts(ptr, len).to_vec()))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A result produced at an exit point.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DataOutput {
    pub data: Vec<u8>,
    pub fragment_id: i32,
    pub custom_param: String,
}

impl DataOutput {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            fragment_id: 0,
            custom_param: String::new(),
        }
    }

    /// Build an output that keeps the frame metadata of `input`.
    pub fn for_input(input: &DataInput, data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            fragment_id: input.fragment_id,
            custom_param: input.custom_param.clone(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Payload as UTF-8, if it is.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.data).ok()
    }
}
