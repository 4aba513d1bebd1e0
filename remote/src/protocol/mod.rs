use serde::{Deserialize, Serialize};

/// Largest read a server answers in one `Data` reply, longer reads are truncated.
pub const MAX_READ_LEN: u64 = 64 * 1024 * 1024;

/// Largest frame accepted on the wire, leaves room for a full read plus encoding overhead.
pub const MAX_FRAME_LEN: usize = 2 * MAX_READ_LEN as usize;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ClientHello {
    pub version: common::version::ProtocolVersion,
    pub user: String,
    pub pid: u32,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub enum ServerHello {
    Accepted {
        version: common::version::ProtocolVersion,
    },
    Rejected {
        reason: String,
    },
}

/// How a file is opened.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct OpenMode {
    pub write: bool,
    pub create: bool,
    pub truncate: bool,
}

impl OpenMode {
    pub fn read_only() -> Self {
        Self::default()
    }

    pub fn create_truncate() -> Self {
        Self {
            write: true,
            create: true,
            truncate: true,
        }
    }

    pub fn is_create_or_truncate(&self) -> bool {
        self.create || self.truncate
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub enum Request {
    Open {
        path: String,
        mode: OpenMode,
        create_mode: u32,
        opaque: String,
    },
    Read {
        offset: u64,
        len: u64,
    },
    Write {
        offset: u64,
        data: Vec<u8>,
    },
    // progress call, starts a third-party pull on a destination handle
    Sync,
    Close,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RequestFrame {
    pub id: u64,
    pub request: Request,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct ErrorReply {
    pub errno: i32,
    pub message: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub enum Response {
    Ok,
    Data(Vec<u8>),
    Written(u64),
    Started { poll_after_secs: u64 },
    Error(ErrorReply),
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub enum ServerMessage {
    Reply {
        id: u64,
        response: Response,
    },
    // sent once, unsolicited, when a transfer started by Sync finishes
    Completed {
        error: Option<ErrorReply>,
    },
}
