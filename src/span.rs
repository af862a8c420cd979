use miette::SourceSpan;

/// Byte position relative to start of source.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Debug)]
pub struct Idx(pub usize);

/// Holds a view into a source.
#[derive(Clone, Copy, PartialEq, Eq, Default, Hash, Debug)]
pub struct Span {
    start: Idx,
    len: usize,
}

impl Span {
    pub fn new(start: Idx, len: usize) -> Self {
        Span { start, len }
    }

    /// Zero-length span, used for diagnostics that have no location in the source.
    pub fn dummy() -> Self {
        Span::default()
    }

    pub fn offs(&self) -> usize {
        self.start.0
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn end(&self) -> usize {
        self.start.0 + self.len
    }

    pub fn as_range(&self) -> std::ops::Range<usize> {
        self.offs()..self.end()
    }

    /// Smallest span covering both `self` and `other`.
    pub fn join(self, other: Span) -> Span {
        let start = self.offs().min(other.offs());
        let end = self.end().max(other.end());
        Span::new(Idx(start), end - start)
    }
}

impl From<Span> for SourceSpan {
    fn from(value: Span) -> Self {
        SourceSpan::new(value.offs().into(), value.len())
    }
}
