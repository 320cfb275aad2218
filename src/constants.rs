// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use cid::Cid;

use crate::datasegment::{PaddedPieceSize, PieceInfo};

/// Piece CID of the small valid CAR that must be prepended to every
/// aggregate for deal acceptance.
pub const PREFIX_CAR_CID: &str = "baga6ea4seaqiklhpuei4wz7x3wwpvnul3sscfyrz2dpi722vgpwlolfky2dmwey";

/// Raw bytes of the prefix CAR.
pub const PREFIX_CAR_HEX: &str =
    "3aa265726f6f747381d82a58250001701220b9ecb605f194801ee8a8355014e7e6e62966f94ccb6081\
     631e82217872209dae6776657273696f6e014101551220704a26a32a76cf3ab66ffe41eb27adefefe9c93206960bb0\
     147b9ed5e1e948b0576861744966487567684576657265747449494957617352696768743f5601701220b9ecb605f1\
     94801ee8a8355014e7e6e62966f94ccb6081631e82217872209dae122c0a2401551220704a26a32a76cf3ab66ffe41\
     eb27adefefe9c93206960bb0147b9ed5e1e948b012026576181d0a020801";

/// Padded size of the prefix CAR piece.
pub const PREFIX_CAR_SIZE_PADDED: u64 = 256;

/// libp2p identifier for the latest deal protocol.
pub const DEAL_PROTOCOL_V120: &str = "/fil/storage/mk/1.2.0";

/// Offset of the deal start epoch from the current chain head.
pub const DEAL_DELAY_EPOCHS: i64 = 200;

/// Storage deal duration in epochs (6 months on mainnet).
pub const DEAL_DURATION_EPOCHS: i64 = 518400;

/// Actor id of the Ethereum Address Manager, under which EVM addresses
/// become delegated storage-network addresses.
pub const ETHEREUM_ADDRESS_MANAGER_ACTOR_ID: u64 = 10;

/// Capacity of the subscriber-to-engine event channel. Buffer many events
/// since the consumer sometimes waits for chain inclusion.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Default timeout for storage-network RPC calls.
pub const LOTUS_TIMEOUT_SECS: u64 = 30;

/// The prefix CAR as a piece, the mandatory first piece of every aggregate.
pub fn prefix_piece() -> PieceInfo {
    PieceInfo {
        size: PaddedPieceSize(PREFIX_CAR_SIZE_PADDED),
        cid: PREFIX_CAR_CID.parse::<Cid>().expect("prefix CAR cid is valid"),
    }
}

/// Decoded bytes of the prefix CAR.
pub fn prefix_car_bytes() -> Vec<u8> {
    hex::decode(PREFIX_CAR_HEX).expect("prefix CAR hex is valid")
}
