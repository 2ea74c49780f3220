use core::fmt;

/// Guest-visible list status.
///
/// Discriminants are the codes returned to the guest by list sync queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ListStatus {
    Done = 0,
    Queued = 1,
    Drawing = 2,
    StallReached = 3,
    CancelDone = 5,
}

impl ListStatus {
    pub const fn guest_code(self) -> u32 {
        self as u32
    }

    pub const fn from_guest_code(code: u32) -> Option<Self> {
        Some(match code {
            0 => Self::Done,
            1 => Self::Queued,
            2 => Self::Drawing,
            3 => Self::StallReached,
            5 => Self::CancelDone,
            _ => return None,
        })
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Done => "PSP_GE_LIST_DONE",
            Self::Queued => "PSP_GE_LIST_QUEUED",
            Self::Drawing => "PSP_GE_LIST_DRAWING",
            Self::StallReached => "PSP_GE_LIST_STALL_REACHED",
            Self::CancelDone => "PSP_GE_LIST_CANCEL_DONE",
        }
    }
}

impl fmt::Display for ListStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
