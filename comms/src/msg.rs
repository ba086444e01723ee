use std::{borrow::Cow, io};

use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};

use crate::{Deserialize, Serialize, value::Value};

type Header = u32;
const HEADER_SIZE: usize = size_of::<Header>();

const ERR_H: Header = 0;
const CONTROL_H: Header = 1;
const REPLY_H: Header = 2;
const DATA_H: Header = 3;

/// The reduction applied by an all-reduce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, SerdeSerialize, SerdeDeserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReduceKind {
    Sum,
    Prod,
    Min,
    Max,
    Avg,
}

/// A collective operation, every worker of a group must issue the same ones in the same order.
#[derive(Debug, Clone, PartialEq, SerdeSerialize, SerdeDeserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectiveOp {
    AllReduce {
        input: usize,
        out: usize,
        reduce: ReduceKind,
    },
    Broadcast {
        input: usize,
        out: usize,
        root: usize,
    },
    AllGather {
        input: usize,
        out: usize,
    },
    Barrier,
}

/// The closed set of commands a controller may issue to a worker.
#[derive(Debug, Clone, PartialEq, SerdeSerialize, SerdeDeserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    SetRegister {
        reg_id: usize,
        value: Value,
    },
    GetRegister {
        reg_id: usize,
    },
    KillRegister {
        reg_id: usize,
    },
    GetOp {
        name: String,
        reg_id: usize,
    },
    Invoke {
        op: String,
        args: Vec<usize>,
        out: usize,
    },
    CallOp {
        func_reg: usize,
        args: Vec<usize>,
        out: usize,
    },
    Collective(CollectiveOp),
    /// Announces that the next frame is a `Msg::Data` with the tensor elements.
    UploadTensor {
        reg_id: usize,
        shape: Vec<usize>,
    },
    DownloadTensor {
        reg_id: usize,
    },
    CopyToWorker0 {
        reg_id: usize,
    },
    CopyFromWorker0 {
        reg_id: usize,
    },
    SyncWorker,
    Shutdown,
}

/// A successful answer to a command.
#[derive(Debug, Clone, PartialEq, SerdeSerialize, SerdeDeserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reply {
    Ack,
    Value(Value),
    Synced { worker_id: usize },
}

/// The application layer message for the entire system.
#[derive(Debug)]
pub enum Msg<'a> {
    Control(Command),
    Reply(Reply),
    Data(&'a [f32]),
    Err(Cow<'a, str>),
}

impl Msg<'_> {
    /// Returns a short name of the message kind for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Msg::Control(_) => "control",
            Msg::Reply(_) => "reply",
            Msg::Data(_) => "data",
            Msg::Err(_) => "err",
        }
    }

    fn buf_is_too_small<T>(size: usize) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("The given buffer is too small {size}, must at least be {HEADER_SIZE} bytes"),
        ))
    }

    fn invalid_json(err: serde_json::Error) -> io::Error {
        io::Error::new(io::ErrorKind::InvalidData, err)
    }

    fn invalid_kind<T>(kind: Header) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Received an invalid message kind {kind}"),
        ))
    }
}

impl<'a> Serialize<'a> for Msg<'a> {
    fn serialize(&'a self, buf: &mut Vec<u8>) -> Option<&'a [u8]> {
        match self {
            Msg::Err(e) => {
                buf.extend_from_slice(&ERR_H.to_be_bytes());
                Some(e.as_bytes())
            }
            Msg::Control(cmd) => {
                buf.extend_from_slice(&CONTROL_H.to_be_bytes());

                // SAFETY: Serialize impl for `Command` is derived and not implemented
                //         by hand. Nor has a non string-key map inside.
                serde_json::to_writer(buf, cmd).unwrap();
                None
            }
            Msg::Reply(reply) => {
                buf.extend_from_slice(&REPLY_H.to_be_bytes());

                // SAFETY: Same as above, `Reply` is derived.
                serde_json::to_writer(buf, reply).unwrap();
                None
            }
            Msg::Data(nums) => {
                buf.extend_from_slice(&DATA_H.to_be_bytes());
                Some(bytemuck::cast_slice(nums))
            }
        }
    }
}

impl<'a> Deserialize<'a> for Msg<'a> {
    fn deserialize(buf: &'a [u8]) -> io::Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Self::buf_is_too_small(buf.len());
        }

        let (kind_buf, rest) = buf.split_at(HEADER_SIZE);
        let mut header = [0; HEADER_SIZE];
        header.copy_from_slice(kind_buf);

        match Header::from_be_bytes(header) {
            ERR_H => {
                let string = str::from_utf8(rest)
                    .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

                Ok(Self::Err(Cow::Borrowed(string)))
            }
            CONTROL_H => {
                let cmd = serde_json::from_slice(rest).map_err(Self::invalid_json)?;
                Ok(Self::Control(cmd))
            }
            REPLY_H => {
                let reply = serde_json::from_slice(rest).map_err(Self::invalid_json)?;
                Ok(Self::Reply(reply))
            }
            DATA_H => {
                let nums = bytemuck::try_cast_slice(rest).map_err(|err| {
                    io::Error::new(io::ErrorKind::InvalidData, format!("bad data frame: {err}"))
                })?;

                Ok(Self::Data(nums))
            }
            kind => Self::invalid_kind(kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(msg: &Msg<'_>) -> Vec<u8> {
        let mut buf = Vec::new();
        if let Some(tail) = msg.serialize(&mut buf) {
            buf.extend_from_slice(tail);
        }
        buf
    }

    #[test]
    fn unknown_kind_is_invalid_data() {
        let buf = 42u32.to_be_bytes();
        let err = Msg::deserialize(&buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn unknown_command_tag_is_invalid_data() {
        let mut buf = CONTROL_H.to_be_bytes().to_vec();
        buf.extend_from_slice(br#"{"format_disk":{"reg_id":0}}"#);
        let err = Msg::deserialize(&buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn short_buffer_is_rejected() {
        assert!(Msg::deserialize(&[0, 1]).is_err());
    }

    #[test]
    fn command_survives_encoding() {
        let cmd = Command::Invoke {
            op: "add".into(),
            args: vec![0, 1],
            out: 2,
        };

        let buf = encode(&Msg::Control(cmd.clone()));
        let Msg::Control(got) = Msg::deserialize(&buf).unwrap() else {
            panic!("expected a control message");
        };

        assert_eq!(got, cmd);
    }
}
