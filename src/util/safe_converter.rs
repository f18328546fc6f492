/// Widening casts that can never lose information.
pub trait SafeCast<T> {
    fn safe_cast(self) -> T;
}

impl SafeCast<usize> for u16 {
    fn safe_cast(self) -> usize {
        self as usize
    }
}

impl SafeCast<u32> for u8 {
    fn safe_cast(self) -> u32 {
        self as u32
    }
}


/// For narrowing casts where the codec has already checked the value against the wire limits.
/// NB: The implementations panic otherwise
pub trait PrecheckedCast<T> {
    fn prechecked_cast(self) -> T;
}

impl PrecheckedCast<u16> for usize {
    fn prechecked_cast(self) -> u16 {
        self.try_into().expect("this is a bug: packet construction should have ensured the value range")
    }
}
