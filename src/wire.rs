//! Fixed width little endian integers

pub trait WireInt: Sized + Copy {
    /// Encoded width in bytes
    const WIDTH: usize;

    /// Append the little endian encoding of `self`
    fn write_le(self, out: &mut Vec<u8>);

    /// Decode from the front of `bytes`, returning the value and the remainder
    fn read_le(bytes: &[u8]) -> Option<(Self, &[u8])>;
}

macro_rules! wire_int {
    ($($t:ty),*) => {
        $(
            impl WireInt for $t {
                const WIDTH: usize = core::mem::size_of::<$t>();

                fn write_le(self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_le_bytes());
                }

                fn read_le(bytes: &[u8]) -> Option<(Self, &[u8])> {
                    if bytes.len() < Self::WIDTH {
                        return None;
                    }
                    let (head, rest) = bytes.split_at(Self::WIDTH);
                    let mut b = [0u8; core::mem::size_of::<$t>()];
                    b.copy_from_slice(head);
                    Some((<$t>::from_le_bytes(b), rest))
                }
            }
        )*
    };
}

wire_int!(u8, u16, u32, u64);
