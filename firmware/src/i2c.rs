//! AS5600 magnetic angle sensor driver.
//!
//! The AS5600 reports the absolute shaft angle as a 12-bit value. Its
//! STATUS register carries a magnet-detected flag; an angle read without a
//! magnet in range is noise, so every sample checks the flag first.
//! STATUS and RAW ANGLE are adjacent, and the sensor auto-increments the
//! register address, so one three-byte read covers both.

use embedded_hal::i2c::{Error as _, I2c};
use tracing::{debug, info};

use crate::encoder::{AngleSensor, SensorFault};

/// AS5600 7-bit I2C address (fixed on this part).
pub const AS5600_ADDR: u8 = 0x36;

const REG_STATUS: u8 = 0x0B; // STATUS: MH, ML, MD bits
const STATUS_MD: u8 = 0x20; // magnet detected
const REG_RAW_ANGLE: u8 = 0x0C; // RAW ANGLE, 0x0C (high nibble) .. 0x0D

const ANGLE_MASK: u16 = 0x0FFF;

pub struct As5600<I> {
    i2c: I,
    address: u8,
    /// Cleared after any failed read; the next read checks STATUS again
    /// before trusting an angle.
    initialized: bool,
    faults: u64,
}

impl<I: I2c> As5600<I> {
    pub fn new(i2c: I) -> Self {
        Self::with_address(i2c, AS5600_ADDR)
    }

    pub fn with_address(i2c: I, address: u8) -> Self {
        Self {
            i2c,
            address,
            initialized: false,
            faults: 0,
        }
    }

    /// Read STATUS and RAW ANGLE in one transfer. An uninitialized driver
    /// first checks that the sensor answers and sees a magnet.
    pub fn raw_angle(&mut self) -> Result<u16, SensorFault> {
        let read = if self.initialized {
            self.sample()
        } else {
            self.detect().and_then(|()| self.sample())
        };
        match read {
            Ok(angle) => {
                if !self.initialized {
                    info!(address = self.address, "AS5600 online");
                    self.initialized = true;
                }
                Ok(angle)
            }
            Err(fault) => {
                if self.initialized {
                    debug!(
                        address = self.address,
                        %fault,
                        "AS5600 read failed, rechecking next tick"
                    );
                }
                self.initialized = false;
                self.faults += 1;
                Err(fault)
            }
        }
    }

    fn detect(&mut self) -> Result<(), SensorFault> {
        let mut status = [0u8; 1];
        self.i2c
            .write_read(self.address, &[REG_STATUS], &mut status)
            .map_err(|e| SensorFault::Bus(e.kind()))?;
        if status[0] & STATUS_MD == 0 {
            return Err(SensorFault::MagnetNotDetected);
        }
        Ok(())
    }

    fn sample(&mut self) -> Result<u16, SensorFault> {
        let mut buf = [0u8; 3];
        self.i2c
            .write_read(self.address, &[REG_STATUS], &mut buf)
            .map_err(|e| SensorFault::Bus(e.kind()))?;
        if buf[0] & STATUS_MD == 0 {
            return Err(SensorFault::MagnetNotDetected);
        }
        let hi = (REG_RAW_ANGLE - REG_STATUS) as usize;
        Ok(u16::from_be_bytes([buf[hi], buf[hi + 1]]) & ANGLE_MASK)
    }
}

impl<I: I2c + Send> AngleSensor for As5600<I> {
    fn read_angle(&mut self) -> Result<u16, SensorFault> {
        self.raw_angle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal::i2c::{ErrorKind, ErrorType, NoAcknowledgeSource, Operation};

    /// Register file with auto-increment reads, like the real part.
    struct FakeBus {
        regs: [u8; 0x100],
        pointer: u8,
        fail: bool,
        transactions: usize,
    }

    impl FakeBus {
        fn new(status: u8, angle: u16) -> Self {
            let mut regs = [0u8; 0x100];
            regs[REG_STATUS as usize] = status;
            regs[REG_RAW_ANGLE as usize] = (angle >> 8) as u8;
            regs[REG_RAW_ANGLE as usize + 1] = angle as u8;
            Self {
                regs,
                pointer: 0,
                fail: false,
                transactions: 0,
            }
        }
    }

    impl ErrorType for FakeBus {
        type Error = ErrorKind;
    }

    impl I2c for FakeBus {
        fn transaction(
            &mut self,
            address: u8,
            operations: &mut [Operation<'_>],
        ) -> Result<(), ErrorKind> {
            self.transactions += 1;
            if self.fail || address != AS5600_ADDR {
                return Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address));
            }
            for op in operations {
                match op {
                    Operation::Write(bytes) => {
                        if let Some(&reg) = bytes.first() {
                            self.pointer = reg;
                        }
                    }
                    Operation::Read(buf) => {
                        for byte in buf.iter_mut() {
                            *byte = self.regs[self.pointer as usize];
                            self.pointer = self.pointer.wrapping_add(1);
                        }
                    }
                }
            }
            Ok(())
        }
    }

    #[test]
    fn reads_twelve_bit_angle() {
        let mut bus = FakeBus::new(STATUS_MD, 0x0ABC);
        bus.regs[REG_RAW_ANGLE as usize] |= 0xF0;
        let mut sensor = As5600::new(bus);
        assert_eq!(sensor.raw_angle(), Ok(0x0ABC));
        assert!(sensor.initialized);
        assert_eq!(sensor.raw_angle(), Ok(0x0ABC));
        // status check on the first read only
        assert_eq!(sensor.i2c.transactions, 3);
    }

    #[test]
    fn missing_magnet_is_a_fault() {
        let mut sensor = As5600::new(FakeBus::new(0x08, 100));
        assert_eq!(sensor.read_angle(), Err(SensorFault::MagnetNotDetected));
        assert_eq!(sensor.read_angle(), Err(SensorFault::MagnetNotDetected));
        assert_eq!(sensor.faults, 2);
        assert!(!sensor.initialized);
    }

    #[test]
    fn rechecks_status_after_bus_error() {
        let mut sensor = As5600::new(FakeBus::new(STATUS_MD, 42));
        assert_eq!(sensor.raw_angle(), Ok(42));
        assert_eq!(sensor.i2c.transactions, 2);

        sensor.i2c.fail = true;
        assert!(matches!(sensor.raw_angle(), Err(SensorFault::Bus(_))));
        assert!(!sensor.initialized);
        assert_eq!(sensor.i2c.transactions, 3);

        sensor.i2c.fail = false;
        assert_eq!(sensor.raw_angle(), Ok(42));
        assert!(sensor.initialized);
        assert_eq!(sensor.i2c.transactions, 5);
        assert_eq!(sensor.faults, 1);
    }

    #[test]
    fn magnet_lost_then_restored() {
        let mut sensor = As5600::new(FakeBus::new(STATUS_MD, 7));
        assert_eq!(sensor.raw_angle(), Ok(7));
        sensor.i2c.regs[REG_STATUS as usize] = 0;
        assert_eq!(sensor.raw_angle(), Err(SensorFault::MagnetNotDetected));
        sensor.i2c.regs[REG_STATUS as usize] = STATUS_MD;
        assert_eq!(sensor.raw_angle(), Ok(7));
    }

    #[test]
    fn wrong_address_does_not_answer() {
        let mut sensor = As5600::with_address(FakeBus::new(STATUS_MD, 1), 0x40);
        assert!(matches!(sensor.raw_angle(), Err(SensorFault::Bus(_))));
    }
}
