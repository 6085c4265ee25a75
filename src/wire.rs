//! Frame encoding for the RPC transport (spec.md §6.1, §6.2).
//!
//! Each frame on the wire is `len(u32 BE) | op(u32 BE) | correlationId(u64 BE)
//! | status(u8, response only) | payload`. `len` covers everything after
//! itself. Integers inside payloads are big-endian fixed width; byte
//! sequences are length-prefixed `u32`.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

/// The closed `op` enumeration (spec.md §6.2). Any code not in this table
/// must be answered with [`Status::UnknownOp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Op {
    Ping = 0,
    ConnectToSlaves = 1,
    Heartbeat = 2,
    MasterInfo = 3,
    GetUnconfirmedHeaderList = 4,
    GetNextBlockToMine = 5,
    AddMinorBlock = 6,
    GetAccountData = 7,
    AddTransaction = 8,
    ExecuteTransaction = 9,
    GetMinorBlock = 10,
    GetTransaction = 11,
    GetTransactionReceipt = 12,
    GetTransactionListByAddress = 13,
    GetLogs = 14,
    EstimateGas = 15,
    GetStorageAt = 16,
    GetCode = 17,
    GasPrice = 18,
    AddRootBlock = 19,
    GetMine = 20,
    GetWork = 21,
    SubmitWork = 22,
}

impl Op {
    pub fn from_u32(v: u32) -> Option<Op> {
        use Op::*;
        Some(match v {
            0 => Ping,
            1 => ConnectToSlaves,
            2 => Heartbeat,
            3 => MasterInfo,
            4 => GetUnconfirmedHeaderList,
            5 => GetNextBlockToMine,
            6 => AddMinorBlock,
            7 => GetAccountData,
            8 => AddTransaction,
            9 => ExecuteTransaction,
            10 => GetMinorBlock,
            11 => GetTransaction,
            12 => GetTransactionReceipt,
            13 => GetTransactionListByAddress,
            14 => GetLogs,
            15 => EstimateGas,
            16 => GetStorageAt,
            17 => GetCode,
            18 => GasPrice,
            19 => AddRootBlock,
            20 => GetMine,
            21 => GetWork,
            22 => SubmitWork,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Ok = 0,
    UnknownOp = 1,
    Error = 2,
}

impl Status {
    fn from_u8(v: u8) -> Status {
        match v {
            0 => Status::Ok,
            1 => Status::UnknownOp,
            _ => Status::Error,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Request {
    pub op_code: u32,
    pub correlation_id: u64,
    pub payload: Bytes,
}

#[derive(Debug, Clone)]
pub struct Response {
    pub op_code: u32,
    pub correlation_id: u64,
    pub status: Status,
    pub payload: Bytes,
}

/// Length-prefixed codec for [`Request`]s, used by the side initiating calls.
pub struct RequestCodec;

impl Encoder<Request> for RequestCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Request, dst: &mut BytesMut) -> io::Result<()> {
        let body_len = 4 + 8 + item.payload.len();
        dst.put_u32(body_len as u32);
        dst.put_u32(item.op_code);
        dst.put_u64(item.correlation_id);
        dst.put_slice(&item.payload);
        Ok(())
    }
}

impl Decoder for RequestCodec {
    type Item = Request;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> io::Result<Option<Request>> {
        if src.len() < 4 {
            return Ok(None);
        }
        let body_len = u32::from_be_bytes(src[..4].try_into().unwrap()) as usize;
        if src.len() < 4 + body_len {
            src.reserve(4 + body_len - src.len());
            return Ok(None);
        }
        src.advance(4);
        let op_code = src.get_u32();
        let correlation_id = src.get_u64();
        let payload = src.split_to(body_len - 12).freeze();
        Ok(Some(Request { op_code, correlation_id, payload }))
    }
}

/// Length-prefixed codec for [`Response`]s, used by the side answering calls.
pub struct ResponseCodec;

impl Encoder<Response> for ResponseCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Response, dst: &mut BytesMut) -> io::Result<()> {
        let body_len = 4 + 8 + 1 + item.payload.len();
        dst.put_u32(body_len as u32);
        dst.put_u32(item.op_code);
        dst.put_u64(item.correlation_id);
        dst.put_u8(item.status as u8);
        dst.put_slice(&item.payload);
        Ok(())
    }
}

impl Decoder for ResponseCodec {
    type Item = Response;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> io::Result<Option<Response>> {
        if src.len() < 4 {
            return Ok(None);
        }
        let body_len = u32::from_be_bytes(src[..4].try_into().unwrap()) as usize;
        if src.len() < 4 + body_len {
            src.reserve(4 + body_len - src.len());
            return Ok(None);
        }
        src.advance(4);
        let op_code = src.get_u32();
        let correlation_id = src.get_u64();
        let status = Status::from_u8(src.get_u8());
        let payload = src.split_to(body_len - 13).freeze();
        Ok(Some(Response { op_code, correlation_id, status, payload }))
    }
}

/// Encodes a length-prefixed byte sequence: `len(u32 BE) | bytes`.
pub fn put_bytes(buf: &mut BytesMut, bytes: &[u8]) {
    buf.put_u32(bytes.len() as u32);
    buf.put_slice(bytes);
}

/// Decodes a length-prefixed byte sequence, advancing `buf`.
pub fn get_bytes(buf: &mut Bytes) -> io::Result<Bytes> {
    if buf.len() < 4 {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated length prefix"));
    }
    let len = buf.get_u32() as usize;
    if buf.len() < len {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated byte sequence"));
    }
    Ok(buf.split_to(len))
}
