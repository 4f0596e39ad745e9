//! Integration tests for the adapter wire records
//!
//! Checks byte layouts against the firmware contract: field order,
//! endianness, fixed sizes and the firmware container laws.

use protocol::{
    Command, DOWNLOAD_BUFFER_SIZE, DOWNLOAD_CHUNK_SIZE, DataBits, EventKind, FIRMWARE_FILL_BYTE,
    FirmwareHeader, InterruptEvent, MAX_FIRMWARE_SIZE, MemoryWrite, ModemStatus, Parity,
    PortStatus, ProtocolError, StopBits, UartConfig, UartFlags, UartMode, build_download_buffer,
    download_checksum,
};

mod uart_config {
    use super::*;

    fn config_with_bits(bits: u8) -> UartConfig {
        UartConfig {
            baud_divisor: 96,
            flags: UartFlags::ENABLE_MS_INTS | UartFlags::ENABLE_AUTO_START_DMA,
            data_bits: DataBits::from_count(bits),
            parity: Parity::None,
            stop_bits: StopBits::One,
            xon: 0,
            xoff: 0,
            uart_mode: UartMode::Rs232,
        }
    }

    #[test]
    fn test_data_bits_codes() {
        let expected = [(5u8, 0x00u8), (6, 0x01), (7, 0x02), (8, 0x03)];
        for (bits, code) in expected {
            assert_eq!(config_with_bits(bits).encode()[4], code, "{} bits", bits);
        }
    }

    #[test]
    fn test_unrecognized_data_bits_encode_as_eight() {
        for bits in [0u8, 1, 4, 9, 16, 255] {
            assert_eq!(config_with_bits(bits).encode()[4], 0x03, "{} bits", bits);
        }
    }

    #[test]
    fn test_words_are_big_endian() {
        let bytes = config_with_bits(8).encode();
        assert_eq!(&bytes[0..2], &[0x00, 0x60]);
        assert_eq!(&bytes[2..4], &[0x60, 0x00]);
    }
}

mod status {
    use super::*;

    #[test]
    fn test_exact_size_required() {
        assert!(PortStatus::decode(&[0x02, 0x03, 0x00, 0x10, 0x20]).is_ok());
        assert!(matches!(
            PortStatus::decode(&[0x02, 0x03, 0x00, 0x10]),
            Err(ProtocolError::MalformedResponse {
                expected: 5,
                actual: 4,
                ..
            })
        ));
    }

    #[test]
    fn test_status_bits_preserved() {
        let status = PortStatus::decode(&[0x02, 0x04, 0x00, 0xFF, 0x3F]).unwrap();
        assert_eq!(status.msr.bits(), 0xFF);
        assert_eq!(status.lsr.bits(), 0x3F);
        assert_eq!(status.encode(), [0x02, 0x04, 0x00, 0xFF, 0x3F]);
    }
}

mod memory {
    use super::*;

    #[test]
    fn test_mcr_write_record() {
        let bytes = MemoryWrite::masked_byte(0xFFB4, 0x34, 0x10).encode();
        assert_eq!(bytes.len(), MemoryWrite::HEADER_SIZE + 2);
        assert_eq!(bytes, [0x30, 0x01, 0x01, 0x00, 0x00, 0xFF, 0xB4, 0x34, 0x10]);
    }
}

mod events {
    use super::*;

    #[test]
    fn test_modem_status_event_for_each_port() {
        for port in 0u8..2 {
            let code = InterruptEvent::code_for(port, 0x04).unwrap();
            let event = InterruptEvent::decode(&[code, 0x11]).unwrap();
            assert_eq!(event.port(), i16::from(port));
            assert_eq!(event.kind(), EventKind::ModemStatus);
            let msr = ModemStatus::from_bits_retain(event.payload);
            assert_eq!(msr.steady(), ModemStatus::CTS);
        }
    }

    #[test]
    fn test_three_byte_buffer_rejected() {
        assert!(InterruptEvent::decode(&[0x34, 0x10, 0x00]).is_err());
    }
}

mod firmware {
    use super::*;

    fn image(len: usize, seed: u32) -> Vec<u8> {
        (0..len as u32)
            .map(|i| (i.wrapping_mul(31).wrapping_add(seed) % 256) as u8)
            .collect()
    }

    #[test]
    fn test_checksum_recomputes_to_header() {
        for (len, seed) in [(0usize, 0u32), (1, 9), (63, 1), (64, 2), (8000, 3), (16284, 4)] {
            let buffer = build_download_buffer(&image(len, seed)).unwrap();
            let header = FirmwareHeader::decode(&buffer).unwrap();
            assert_eq!(header.checksum, download_checksum(&buffer), "len {}", len);
            assert_eq!(usize::from(header.length), len);
        }
    }

    #[test]
    fn test_padding_law() {
        for len in [0usize, 10, 1000, 16283] {
            let buffer = build_download_buffer(&image(len, 7)).unwrap();
            assert_eq!(buffer.len(), DOWNLOAD_BUFFER_SIZE);
            assert!(
                buffer[FirmwareHeader::SIZE + len..]
                    .iter()
                    .all(|b| *b == FIRMWARE_FILL_BYTE),
                "len {}",
                len
            );
        }
    }

    #[test]
    fn test_full_image_chunking() {
        let buffer = build_download_buffer(&image(MAX_FIRMWARE_SIZE, 0)).unwrap();
        let chunks: Vec<&[u8]> = buffer.chunks(DOWNLOAD_CHUNK_SIZE).collect();
        assert_eq!(chunks.len(), 255);
        assert!(chunks[..254].iter().all(|c| c.len() == 64));
        assert_eq!(chunks[254].len(), 16287 - 254 * 64);
    }

    #[test]
    fn test_too_large() {
        assert!(matches!(
            build_download_buffer(&vec![0u8; 20_000]),
            Err(ProtocolError::FirmwareTooLarge { size: 20_000, .. })
        ));
    }
}

#[test]
fn test_command_codes_are_stable() {
    assert_eq!(Command::GetPortStatus.code(), 0x02);
    assert_eq!(Command::SetConfig.code(), 0x05);
    assert_eq!(Command::OpenPort.code(), 0x06);
    assert_eq!(Command::ClosePort.code(), 0x07);
    assert_eq!(Command::StartPort.code(), 0x08);
    assert_eq!(Command::PurgePort.code(), 0x0B);
    assert_eq!(Command::WriteData.code(), 0x80);
}
