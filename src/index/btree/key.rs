//! Fixed-width key encoding.

use std::fmt::Debug;

/// A key type the tree can store.
///
/// Keys are totally ordered in memory and stored on disk as exactly
/// [`ENCODED_LEN`](Self::ENCODED_LEN) bytes. The engine never compares
/// encoded bytes, so the encoding does not need to preserve order.
pub trait BTreeKey: Ord + Clone + Debug + Send + Sync + 'static {
    /// Width of the encoded key in bytes.
    const ENCODED_LEN: usize;

    /// Write the key into `out`, which is exactly `ENCODED_LEN` bytes.
    fn encode(&self, out: &mut [u8]);

    /// Read a key from `bytes`, which is exactly `ENCODED_LEN` bytes.
    fn decode(bytes: &[u8]) -> Self;
}

macro_rules! impl_int_key {
    ($($ty:ty),* $(,)?) => {
        $(
            impl BTreeKey for $ty {
                const ENCODED_LEN: usize = std::mem::size_of::<$ty>();

                #[inline]
                fn encode(&self, out: &mut [u8]) {
                    out.copy_from_slice(&self.to_le_bytes());
                }

                #[inline]
                fn decode(bytes: &[u8]) -> Self {
                    let mut buf = [0u8; std::mem::size_of::<$ty>()];
                    buf.copy_from_slice(bytes);
                    <$ty>::from_le_bytes(buf)
                }
            }
        )*
    };
}

impl_int_key!(u32, u64, i32, i64, u128);

impl<const N: usize> BTreeKey for [u8; N] {
    const ENCODED_LEN: usize = N;

    #[inline]
    fn encode(&self, out: &mut [u8]) {
        out.copy_from_slice(self);
    }

    #[inline]
    fn decode(bytes: &[u8]) -> Self {
        let mut buf = [0u8; N];
        buf.copy_from_slice(bytes);
        buf
    }
}
