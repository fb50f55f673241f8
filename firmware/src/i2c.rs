//! Blocking TWI master for the ATmega32U4, exposed as an `embedded-hal` I2C bus.
//!
//! Only the transaction primitive is implemented; `write`, `read` and
//! `write_read` come from the trait's provided methods.

use avr_device::atmega32u4::TWI;
use embedded_hal::i2c::{self, ErrorKind, ErrorType, I2c, NoAcknowledgeSource, Operation};

/// SCL freq = CPU_FREQ / (16 + 2 * TWBR * prescaler)
/// 100kHz = 16MHz / (16 + 2 * 72 * 1) => TWBR = 72
const TWBR_VALUE: u8 = 72;

// TWI status codes
const TW_START: u8 = 0x08;
const TW_REP_START: u8 = 0x10;
const TW_MT_SLA_ACK: u8 = 0x18;
const TW_MT_SLA_NACK: u8 = 0x20;
const TW_MT_DATA_ACK: u8 = 0x28;
const TW_MT_DATA_NACK: u8 = 0x30;
const TW_ARB_LOST: u8 = 0x38;
const TW_MR_SLA_ACK: u8 = 0x40;
const TW_MR_SLA_NACK: u8 = 0x48;
const TW_MR_DATA_ACK: u8 = 0x50;
const TW_MR_DATA_NACK: u8 = 0x58;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TwiError {
    NoAcknowledge(NoAcknowledgeSource),
    ArbitrationLoss,
    /// TWINT never came up.
    Timeout,
    /// Any other status code.
    Status(u8),
}

impl i2c::Error for TwiError {
    fn kind(&self) -> ErrorKind {
        match *self {
            TwiError::NoAcknowledge(source) => ErrorKind::NoAcknowledge(source),
            TwiError::ArbitrationLoss => ErrorKind::ArbitrationLoss,
            TwiError::Timeout | TwiError::Status(_) => ErrorKind::Bus,
        }
    }
}

fn status_error(status: u8) -> TwiError {
    match status {
        TW_MT_SLA_NACK | TW_MR_SLA_NACK => TwiError::NoAcknowledge(NoAcknowledgeSource::Address),
        TW_MT_DATA_NACK => TwiError::NoAcknowledge(NoAcknowledgeSource::Data),
        TW_ARB_LOST => TwiError::ArbitrationLoss,
        other => TwiError::Status(other),
    }
}

pub struct Twi {
    twi: TWI,
}

impl Twi {
    /// Set up a 100kHz bus.
    pub fn new(twi: TWI) -> Self {
        twi.twbr.write(|w| unsafe { w.bits(TWBR_VALUE) });
        // Prescaler = 1 (TWPS = 0)
        twi.twsr.write(|w| w.twps().prescaler_1());
        twi.twcr.write(|w| w.twen().set_bit());
        Self { twi }
    }

    fn start(&mut self) -> Result<(), TwiError> {
        self.twi
            .twcr
            .write(|w| w.twint().set_bit().twsta().set_bit().twen().set_bit());
        match self.wait()? {
            TW_START | TW_REP_START => Ok(()),
            status => Err(status_error(status)),
        }
    }

    fn address(&mut self, address: u8, read: bool) -> Result<(), TwiError> {
        let expected = if read { TW_MR_SLA_ACK } else { TW_MT_SLA_ACK };
        match self.send((address << 1) | read as u8)? {
            status if status == expected => Ok(()),
            status => Err(status_error(status)),
        }
    }

    fn write_byte(&mut self, data: u8) -> Result<(), TwiError> {
        match self.send(data)? {
            TW_MT_DATA_ACK => Ok(()),
            status => Err(status_error(status)),
        }
    }

    /// Clock in one byte, acknowledging it unless it is the last one wanted.
    fn read_byte(&mut self, ack: bool) -> Result<u8, TwiError> {
        if ack {
            self.twi
                .twcr
                .write(|w| w.twint().set_bit().twea().set_bit().twen().set_bit());
        } else {
            self.twi.twcr.write(|w| w.twint().set_bit().twen().set_bit());
        }
        let expected = if ack { TW_MR_DATA_ACK } else { TW_MR_DATA_NACK };
        match self.wait()? {
            status if status == expected => Ok(self.twi.twdr.read().bits()),
            status => Err(status_error(status)),
        }
    }

    fn send(&mut self, data: u8) -> Result<u8, TwiError> {
        self.twi.twdr.write(|w| unsafe { w.bits(data) });
        self.twi.twcr.write(|w| w.twint().set_bit().twen().set_bit());
        self.wait()
    }

    fn stop(&mut self) {
        self.twi
            .twcr
            .write(|w| w.twint().set_bit().twsto().set_bit().twen().set_bit());
    }

    /// Busy-wait for TWINT, then return the masked status.
    fn wait(&mut self) -> Result<u8, TwiError> {
        let mut timeout: u16 = 0xFFFF;
        while self.twi.twcr.read().twint().bit_is_clear() {
            timeout -= 1;
            if timeout == 0 {
                return Err(TwiError::Timeout);
            }
        }
        // Upper five bits; the low bits hold the prescaler
        Ok(self.twi.twsr.read().bits() & 0xF8)
    }

    fn run(&mut self, address: u8, operations: &mut [Operation<'_>]) -> Result<(), TwiError> {
        let mut previous_read = None;
        let count = operations.len();

        for i in 0..count {
            let read = matches!(operations[i], Operation::Read(_));
            // Adjacent operations of the same kind share one START
            if previous_read != Some(read) {
                self.start()?;
                self.address(address, read)?;
            }
            let next_is_read = operations
                .get(i + 1)
                .is_some_and(|op| matches!(op, Operation::Read(_)));

            match &mut operations[i] {
                Operation::Write(bytes) => {
                    for &byte in bytes.iter() {
                        self.write_byte(byte)?;
                    }
                }
                Operation::Read(buffer) => {
                    let len = buffer.len();
                    for (j, byte) in buffer.iter_mut().enumerate() {
                        // NACK the final byte before a STOP or a direction change
                        *byte = self.read_byte(j + 1 < len || next_is_read)?;
                    }
                }
            }
            previous_read = Some(read);
        }
        Ok(())
    }
}

impl ErrorType for Twi {
    type Error = TwiError;
}

impl I2c for Twi {
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        let result = self.run(address, operations);
        self.stop();
        result
    }
}
