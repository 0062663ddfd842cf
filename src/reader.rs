use crate::error::Result;
use crate::wire::{self, Layout, Record, MAGIC_BYTES, STRUCTURED_HEADER_SIZE, VERSION_2};

/// Sequential reader over a stream of concatenated records, such as a log
/// file written through a dispatcher.
///
/// Each item is one decoded record or the error for one bad record. After an
/// error the reader skips ahead to the next `ZLOG` magic tag and carries on,
/// so a corrupt or torn record costs only itself.
///
/// Version 1 records do not say which layout they use. The reader settles the
/// guess by looking at where each candidate record would end: a real record
/// is followed by another magic tag or by the end of the data.
///
/// # Examples
///
/// ```
/// # use zlog::RecordReader;
/// # use zlog::wire::{self, Level};
/// let mut data = wire::encode(Level::Info, None, 0, "first", &[]);
/// data.extend_from_slice(b"garbage");
/// data.extend(wire::encode(Level::Info, None, 0, "second", &[]));
///
/// let results: Vec<_> = RecordReader::new(&data).collect();
/// assert_eq!(results.len(), 3);
/// assert!(results[1].is_err());
/// assert_eq!(results[2].as_ref().unwrap().message, b"second");
/// ```
#[derive(Debug, Clone)]
pub struct RecordReader<'a> {
    data: &'a [u8],
    pos: usize,
    skipped: usize,
}

impl<'a> RecordReader<'a> {
    /// Creates a reader positioned at the start of `data`.
    ///
    /// # Arguments
    ///
    /// * `data` - Concatenated records, typically the contents of a log file
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            skipped: 0,
        }
    }

    /// Offset of the next unread byte.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes passed over while resynchronising.
    pub fn skipped_bytes(&self) -> usize {
        self.skipped
    }

    /// Decodes the next record, or returns `None` at the end of the data.
    pub fn read_record(&mut self) -> Option<Result<Record<'a>>> {
        let rest = self.data.get(self.pos..).filter(|rest| !rest.is_empty())?;

        match decode_in_stream(rest) {
            Ok(record) => {
                self.pos += record.encoded_len;
                Some(Ok(record))
            }
            Err(err) => {
                let next = find_magic(&rest[1..]).map_or(rest.len(), |at| at + 1);
                self.pos += next;
                self.skipped += next;
                Some(Err(err))
            }
        }
    }
}

impl<'a> Iterator for RecordReader<'a> {
    type Item = Result<Record<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_record()
    }
}

/// Decodes the record at the start of `rest`, where whatever follows the
/// record is either more records or nothing.
///
/// A version 1 basic guess is checked against the structured reading. The
/// structured reading is taken when its fields parse cleanly, it ends on a
/// record boundary, and it is no longer than the basic one or the basic one
/// does not end on a boundary. A longer reading only lands on a boundary by
/// running over later records.
pub(crate) fn decode_in_stream(rest: &[u8]) -> Result<Record<'_>> {
    let guess = wire::decode(rest)?;
    if guess.version == VERSION_2 || guess.layout != Layout::Basic {
        return Ok(guess);
    }

    match wire::decode_as(rest, Layout::Structured) {
        Ok(structured)
            if fields_are_clean(rest, &structured)
                && ends_on_boundary(rest, structured.encoded_len)
                && (structured.encoded_len <= guess.encoded_len
                    || !ends_on_boundary(rest, guess.encoded_len)) =>
        {
            Ok(structured)
        }
        _ => Ok(guess),
    }
}

/// Every declared field was read and none needed a placeholder.
fn fields_are_clean(rest: &[u8], record: &Record<'_>) -> bool {
    let count_at = STRUCTURED_HEADER_SIZE + 1 + record.message.len();
    let declared = rest.get(count_at).map_or(0, |&count| count as usize);
    record.fields.len() == declared
        && record.fields.iter().all(|field| !field.value.is_placeholder())
}

fn ends_on_boundary(rest: &[u8], len: usize) -> bool {
    rest.get(len..)
        .is_some_and(|after| after.is_empty() || after.starts_with(&MAGIC_BYTES))
}

fn find_magic(data: &[u8]) -> Option<usize> {
    data.windows(MAGIC_BYTES.len())
        .position(|window| window == MAGIC_BYTES)
}
