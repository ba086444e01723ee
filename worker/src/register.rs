use comms::value::Value;

use crate::{Result, WorkerErr};

/// Indexed storage of the values a worker operates on.
///
/// Grows one register at a time from the end, never shrinks. Writing an existing
/// register drops its previous value.
#[derive(Debug, Default)]
pub struct RegisterFile {
    registers: Vec<Value>,
}

impl RegisterFile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }

    /// Reads the value at `reg_id`.
    ///
    /// # Errors
    /// `OutOfRange` if `reg_id` is not below the current length.
    pub fn read(&self, reg_id: usize) -> Result<&Value> {
        self.registers.get(reg_id).ok_or(WorkerErr::OutOfRange {
            reg_id,
            len: self.len(),
        })
    }

    /// Writes `value` at `reg_id`.
    ///
    /// Appends when `reg_id` equals the current length and overwrites when it is below it.
    ///
    /// # Errors
    /// `OutOfRange` if `reg_id` is past the end, registers are never sparse.
    pub fn write(&mut self, reg_id: usize, value: Value) -> Result<()> {
        let len = self.len();

        match reg_id {
            id if id < len => self.registers[id] = value,
            id if id == len => self.registers.push(value),
            _ => return Err(WorkerErr::OutOfRange { reg_id, len }),
        }

        Ok(())
    }

    /// Moves the value out of `reg_id`, leaving `Null` behind.
    pub fn take(&mut self, reg_id: usize) -> Result<Value> {
        let len = self.len();
        self.registers
            .get_mut(reg_id)
            .map(std::mem::take)
            .ok_or(WorkerErr::OutOfRange { reg_id, len })
    }

    /// Releases the value held at `reg_id`.
    pub fn kill(&mut self, reg_id: usize) -> Result<()> {
        self.take(reg_id).map(drop)
    }
}
