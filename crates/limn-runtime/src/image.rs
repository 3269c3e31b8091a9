//! Heap-image persistence (§4.N, §6 "Persisted state").
//!
//! The format is a header (`{magic, version, heap_size, aux_size,
//! const_heap_ix, global_env_root, startup_value}`) followed by a
//! verbatim copy of the constant heap's contents. Only the constant
//! heap is persisted: the mutable cons arena and auxiliary memory are
//! process-lifetime scratch space the spec never asks an image to carry
//! (§4.J treats the constant heap as the one region with a lifetime
//! longer than a single process). `serde` + `bincode` give the
//! deterministic binary encoding, mirrored from the same pattern the
//! teacher crate uses for its own value serialization: an owned,
//! arena-free mirror type that *is* `Serialize`/`Deserialize`, converted
//! to and from the live, arena-addressed `Word`/`Cell` at the boundary.

use limn_core::{Cell, ConstHeap, Heap, Numeric, SymbolId, Word};
use serde::{Deserialize, Serialize};

pub const IMAGE_MAGIC: u32 = 0x4C49_4D4E; // b"LIMN"
pub const IMAGE_VERSION: u32 = 1;

#[derive(Debug)]
pub enum ImageError {
    Bincode(Box<bincode::Error>),
    BadMagic(u32),
    UnsupportedVersion(u32),
    /// A mutable-arena pointer was asked to be persisted; only constant-
    /// heap pointers survive an image round trip.
    HeapPointerNotPersistable,
    /// An array-backed constant-heap slot; the image format does not yet
    /// carry auxiliary-memory contents (§4.N scope).
    ArrayNotPersistable,
    ConstHeapTooSmall { have: u32, need: u32 },
}

impl std::fmt::Display for ImageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageError::Bincode(e) => write!(f, "image encoding error: {e}"),
            ImageError::BadMagic(m) => write!(f, "not a limn image (magic {m:#x})"),
            ImageError::UnsupportedVersion(v) => write!(f, "unsupported image version {v}"),
            ImageError::HeapPointerNotPersistable => {
                write!(f, "a mutable-arena pointer cannot be persisted in an image")
            }
            ImageError::ArrayNotPersistable => {
                write!(f, "array-backed constant-heap slots are not yet persisted")
            }
            ImageError::ConstHeapTooSmall { have, need } => write!(
                f,
                "image needs a constant heap of capacity {need}, this runtime has {have}"
            ),
        }
    }
}

impl std::error::Error for ImageError {}

impl From<bincode::Error> for ImageError {
    fn from(e: bincode::Error) -> Self {
        ImageError::Bincode(Box::new(e))
    }
}

/// Owned, arena-free mirror of [`Word`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
enum ImageWord {
    Int(i32),
    UInt(u32),
    Char(char),
    Symbol(u32),
    ConstPtr(u32),
}

/// Owned mirror of [`Numeric`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
enum ImageNumeric {
    Int(i32),
    UInt(u32),
    I32(i32),
    U32(u32),
    F32(f32),
    I64(i64),
    U64(u64),
    F64(f64),
}

/// Owned mirror of one occupied [`Cell`] in the constant heap.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
enum ImageCell {
    Cons { car: ImageWord, cdr: ImageWord },
    Boxed(ImageNumeric),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ImageHeader {
    pub magic: u32,
    pub version: u32,
    pub heap_size: u32,
    pub aux_size: u32,
    pub const_heap_ix: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct Image {
    header: ImageHeader,
    global_env_root: ImageWord,
    startup_value: ImageWord,
    const_cells: Vec<Option<ImageCell>>,
}

fn word_to_image(w: Word) -> Result<ImageWord, ImageError> {
    Ok(match w {
        Word::Int(n) => ImageWord::Int(n),
        Word::UInt(n) => ImageWord::UInt(n),
        Word::Char(c) => ImageWord::Char(c),
        Word::Symbol(SymbolId(id)) => ImageWord::Symbol(id),
        Word::Ptr(limn_core::Ptr::Const(limn_core::ConstIndex(ix))) => ImageWord::ConstPtr(ix),
        Word::Ptr(limn_core::Ptr::Heap(_)) => return Err(ImageError::HeapPointerNotPersistable),
    })
}

fn word_from_image(w: ImageWord) -> Word {
    match w {
        ImageWord::Int(n) => Word::Int(n),
        ImageWord::UInt(n) => Word::UInt(n),
        ImageWord::Char(c) => Word::Char(c),
        ImageWord::Symbol(id) => Word::Symbol(SymbolId(id)),
        ImageWord::ConstPtr(ix) => Word::const_ptr(limn_core::ConstIndex(ix)),
    }
}

fn numeric_to_image(n: Numeric) -> ImageNumeric {
    match n {
        Numeric::Int(v) => ImageNumeric::Int(v),
        Numeric::UInt(v) => ImageNumeric::UInt(v),
        Numeric::I32(v) => ImageNumeric::I32(v),
        Numeric::U32(v) => ImageNumeric::U32(v),
        Numeric::F32(v) => ImageNumeric::F32(v),
        Numeric::I64(v) => ImageNumeric::I64(v),
        Numeric::U64(v) => ImageNumeric::U64(v),
        Numeric::F64(v) => ImageNumeric::F64(v),
    }
}

fn numeric_from_image(n: ImageNumeric) -> Numeric {
    match n {
        ImageNumeric::Int(v) => Numeric::Int(v),
        ImageNumeric::UInt(v) => Numeric::UInt(v),
        ImageNumeric::I32(v) => Numeric::I32(v),
        ImageNumeric::U32(v) => Numeric::U32(v),
        ImageNumeric::F32(v) => Numeric::F32(v),
        ImageNumeric::I64(v) => Numeric::I64(v),
        ImageNumeric::U64(v) => Numeric::U64(v),
        ImageNumeric::F64(v) => Numeric::F64(v),
    }
}

fn cell_to_image(cell: &Cell) -> Result<ImageCell, ImageError> {
    match cell {
        Cell::Cons { car, cdr } => Ok(ImageCell::Cons {
            car: word_to_image(*car)?,
            cdr: word_to_image(*cdr)?,
        }),
        Cell::Boxed(n) => Ok(ImageCell::Boxed(numeric_to_image(*n))),
        Cell::Free { .. } | Cell::Array(_) => Err(ImageError::ArrayNotPersistable),
    }
}

fn cell_from_image(cell: ImageCell) -> Cell {
    match cell {
        ImageCell::Cons { car, cdr } => Cell::Cons {
            car: word_from_image(car),
            cdr: word_from_image(cdr),
        },
        ImageCell::Boxed(n) => Cell::Boxed(numeric_from_image(n)),
    }
}

/// §6 `image_save_*`: snapshot the constant heap plus the global
/// environment root and a caller-chosen startup value into a portable
/// byte buffer.
pub fn image_save(heap: &Heap, startup_value: Word) -> Result<Vec<u8>, ImageError> {
    let capacity = heap.const_heap.capacity();
    let mut const_cells = Vec::with_capacity(capacity as usize);
    for ix in 0..capacity {
        const_cells.push(match heap.const_heap.get(ix) {
            Some(cell) => Some(cell_to_image(cell)?),
            None => None,
        });
    }
    let image = Image {
        header: ImageHeader {
            magic: IMAGE_MAGIC,
            version: IMAGE_VERSION,
            heap_size: heap.cell_capacity(),
            aux_size: heap.aux.capacity(),
            const_heap_ix: capacity,
        },
        global_env_root: word_to_image(heap.global_env)?,
        startup_value: word_to_image(startup_value)?,
        const_cells,
    };
    Ok(bincode::serialize(&image)?)
}

/// §6 `image_boot`: repopulate the constant heap and global environment
/// from a buffer produced by [`image_save`]. Returns the saved startup
/// value.
pub fn image_boot(heap: &mut Heap, bytes: &[u8]) -> Result<Word, ImageError> {
    let image: Image = bincode::deserialize(bytes)?;
    if image.header.magic != IMAGE_MAGIC {
        return Err(ImageError::BadMagic(image.header.magic));
    }
    if image.header.version != IMAGE_VERSION {
        return Err(ImageError::UnsupportedVersion(image.header.version));
    }
    if heap.const_heap.capacity() < image.header.const_heap_ix {
        return Err(ImageError::ConstHeapTooSmall {
            have: heap.const_heap.capacity(),
            need: image.header.const_heap_ix,
        });
    }
    for (ix, slot) in image.const_cells.into_iter().enumerate() {
        if let Some(cell) = slot {
            heap.const_heap.const_write(ix as u32, cell_from_image(cell))?;
        }
    }
    heap.global_env = word_from_image(image.global_env_root);
    Ok(word_from_image(image.startup_value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use limn_core::reserved;

    fn heap_with_consts() -> Heap {
        let mut heap = Heap::new(16, 256, 4, 1);
        heap.const_heap
            .const_write(0, Cell::Boxed(Numeric::I64(7)))
            .unwrap();
        heap.const_heap
            .const_write(
                1,
                Cell::Cons {
                    car: Word::Int(1),
                    cdr: Word::Symbol(reserved::NIL),
                },
            )
            .unwrap();
        heap.global_env = Word::const_ptr(limn_core::ConstIndex(1));
        heap
    }

    #[test]
    fn save_then_boot_round_trips_const_heap_contents() {
        let heap = heap_with_consts();
        let bytes = image_save(&heap, Word::Int(99)).unwrap();

        let mut fresh = Heap::new(16, 256, 4, 1);
        let startup = image_boot(&mut fresh, &bytes).unwrap();

        assert_eq!(startup, Word::Int(99));
        assert!(matches!(fresh.const_heap.get(0), Some(Cell::Boxed(Numeric::I64(7)))));
        assert_eq!(fresh.global_env, Word::const_ptr(limn_core::ConstIndex(1)));
    }

    #[test]
    fn bad_magic_is_rejected() {
        let heap = heap_with_consts();
        let mut bytes = image_save(&heap, Word::Int(0)).unwrap();
        bytes[0] ^= 0xFF;
        let mut fresh = Heap::new(16, 256, 4, 1);
        assert!(image_boot(&mut fresh, &bytes).is_err());
    }

    #[test]
    fn heap_pointer_cannot_be_saved() {
        let mut heap = Heap::new(16, 256, 4, 1);
        let cell = heap.cons(Word::Int(1), Word::Symbol(reserved::NIL)).unwrap();
        heap.global_env = cell;
        let err = image_save(&heap, Word::Int(0)).unwrap_err();
        assert!(matches!(err, ImageError::HeapPointerNotPersistable));
    }

    #[test]
    fn undersized_const_heap_is_rejected_on_boot() {
        let heap = heap_with_consts();
        let bytes = image_save(&heap, Word::Int(0)).unwrap();
        let mut tiny = Heap::new(16, 256, 1, 1);
        let err = image_boot(&mut tiny, &bytes).unwrap_err();
        assert!(matches!(err, ImageError::ConstHeapTooSmall { .. }));
    }
}
