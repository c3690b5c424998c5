//! Status helper enums mapping to SMALLSERIAL/SMALLINT lookup tables.
//!
//! Each enum variant's discriminant matches the seed data order (1-based)
//! in the corresponding `*_statuses` database table.

/// Status ID type matching SMALLINT/SMALLSERIAL in the database.
pub type StatusId = i16;

macro_rules! define_status_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $val:expr ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[repr(i16)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $val ),+
        }

        impl $name {
            /// Return the database status ID.
            pub fn id(self) -> StatusId {
                self as StatusId
            }
        }

        impl From<$name> for StatusId {
            fn from(value: $name) -> Self {
                value as StatusId
            }
        }
    };
}

define_status_enum! {
    /// Queue message lifecycle status.
    MessageStatus {
        Queued = 1,
        Processing = 2,
        Done = 3,
        Failed = 4,
        DeadLetter = 5,
    }
}

impl MessageStatus {
    /// Parse the lookup-table name used in API query parameters.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "queued" => Some(MessageStatus::Queued),
            "processing" => Some(MessageStatus::Processing),
            "done" => Some(MessageStatus::Done),
            "failed" => Some(MessageStatus::Failed),
            "dead_letter" => Some(MessageStatus::DeadLetter),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            MessageStatus::Queued => "queued",
            MessageStatus::Processing => "processing",
            MessageStatus::Done => "done",
            MessageStatus::Failed => "failed",
            MessageStatus::DeadLetter => "dead_letter",
        }
    }
}

define_status_enum! {
    /// Worker directory status. A worker is either accepting claims or
    /// it is gone; draining is not a visible state.
    WorkerStatus {
        Active = 1,
        Stopped = 2,
    }
}

define_status_enum! {
    /// Hydration snapshot lifecycle status.
    SnapshotStatus {
        Uploading = 1,
        Ready = 2,
        Failed = 3,
        Expired = 4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_status_ids_match_seed_data() {
        assert_eq!(MessageStatus::Queued.id(), 1);
        assert_eq!(MessageStatus::Processing.id(), 2);
        assert_eq!(MessageStatus::Done.id(), 3);
        assert_eq!(MessageStatus::Failed.id(), 4);
        assert_eq!(MessageStatus::DeadLetter.id(), 5);
    }

    #[test]
    fn message_status_names_round_trip() {
        for status in [
            MessageStatus::Queued,
            MessageStatus::Processing,
            MessageStatus::Done,
            MessageStatus::Failed,
            MessageStatus::DeadLetter,
        ] {
            assert_eq!(MessageStatus::from_name(status.name()), Some(status));
        }
        assert_eq!(MessageStatus::from_name("bogus"), None);
    }

    #[test]
    fn worker_status_ids_match_seed_data() {
        assert_eq!(WorkerStatus::Active.id(), 1);
        assert_eq!(WorkerStatus::Stopped.id(), 2);
    }

    #[test]
    fn snapshot_status_ids_match_seed_data() {
        assert_eq!(SnapshotStatus::Uploading.id(), 1);
        assert_eq!(SnapshotStatus::Ready.id(), 2);
        assert_eq!(SnapshotStatus::Failed.id(), 3);
        assert_eq!(SnapshotStatus::Expired.id(), 4);
    }
}
