use core::fmt::{Debug, Display, Formatter};

/// CAN frame consisting of ID and data
#[derive(Clone, PartialEq, Eq)]
pub struct CanFrame {
    /// The ID of the frame
    pub id: embedded_can::Id,
    /// The payload of the frame
    pub data: heapless::Vec<u8, { Self::MAX_LEN }>,
}

#[cfg(feature = "arbitrary")]
use embedded_can::{ExtendedId, StandardId};
#[cfg(feature = "arbitrary")]
impl arbitrary::Arbitrary<'_> for CanFrame {
    fn arbitrary(u: &mut arbitrary::Unstructured<'_>) -> arbitrary::Result<Self> {
        let id: u32 = u.int_in_range(0..=0x1FFFFFFF)?;
        let standard = id <= 0x7FF && u.arbitrary::<bool>()?;
        let id = if standard {
            embedded_can::Id::Standard(
                StandardId::new(id as u16).ok_or(arbitrary::Error::IncorrectFormat)?,
            )
        } else {
            embedded_can::Id::Extended(
                ExtendedId::new(id).ok_or(arbitrary::Error::IncorrectFormat)?,
            )
        };
        let data_len = u.int_in_range(0..=Self::MAX_LEN as u8)?;
        let mut data = heapless::Vec::new();
        for _ in 0..data_len {
            data.push(u.int_in_range(0..=255)?)
                .map_err(|_| arbitrary::Error::IncorrectFormat)?;
        }
        Ok(Self { id, data })
    }
}

impl CanFrame {
    pub const MAX_LEN: usize = 8;

    /// Wrap an already encoded CAN frame, `None` if the payload exceeds 8 bytes
    pub fn from_encoded(id: impl Into<embedded_can::Id>, data: &[u8]) -> Option<Self> {
        Some(Self {
            id: id.into(),
            data: heapless::Vec::from_slice(data).ok()?,
        })
    }

    /// The 11 or 29 bit identifier without any frame-format flag
    pub fn raw_id(&self) -> u32 {
        match self.id {
            embedded_can::Id::Standard(id) => id.as_raw() as u32,
            embedded_can::Id::Extended(id) => id.as_raw(),
        }
    }

    /// Bits 16..=23 of the identifier
    pub fn packet_function(&self) -> u8 {
        crate::packet_function(self.raw_id())
    }

    pub fn is_extended(&self) -> bool {
        matches!(self.id, embedded_can::Id::Extended(_))
    }

    /// Renders the frame the way the raw report prints it: `0x98FF28F4 [8] 0F 32 ..`
    pub fn raw_dump(&self) -> RawDump<'_> {
        RawDump(self)
    }
}

pub struct RawDump<'a>(&'a CanFrame);

impl Display for RawDump<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(f, "0x{:X} [{}]", self.0.raw_id(), self.0.data.len())?;
        for byte in self.0.data.iter() {
            write!(f, " {:02X}", byte)?;
        }
        Ok(())
    }
}

impl Debug for CanFrame {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        struct DebugId(embedded_can::Id);
        impl Debug for DebugId {
            fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
                match self.0 {
                    embedded_can::Id::Extended(e) => {
                        f.write_fmt(format_args!("{:#010X}", e.as_raw()))
                    }
                    embedded_can::Id::Standard(s) => {
                        f.write_fmt(format_args!("{:#06X}", s.as_raw()))
                    }
                }
            }
        }

        struct DebugData<'a>(&'a [u8]);
        impl Debug for DebugData<'_> {
            fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
                let mut list = f.debug_list();
                for &elem in self.0 {
                    list.entry(&format_args!("{:#04X}", elem));
                }
                list.finish()
            }
        }

        f.debug_struct("CanFrame")
            .field("id", &DebugId(self.id))
            .field("data", &DebugData(&self.data))
            .finish()
    }
}
