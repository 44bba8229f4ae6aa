use crate::{ErrorCode, Result, error::bail};

use super::Instruction;

/// Position inside a flat instruction stream.
#[derive(Debug, Clone, Copy)]
pub struct InstructionCursor<'a> {
    code: &'a [Instruction],
    index: usize,
}

impl<'a> InstructionCursor<'a> {
    pub fn new(code: &'a [Instruction]) -> Self {
        Self { code, index: 0 }
    }

    #[inline(always)]
    pub fn index(&self) -> usize {
        self.index
    }

    #[inline(always)]
    pub fn current(&self) -> Option<&'a Instruction> {
        self.code.get(self.index)
    }

    #[inline(always)]
    pub fn advance(&mut self) {
        self.index += 1;
    }

    /// Moves to `index + offset`. Landing one past the end is allowed and
    /// ends execution, anything further is `out_of_bounds`.
    pub fn jump(&mut self, offset: i32) -> Result<()> {
        let target = self.index as i64 + offset as i64;
        if target < 0 || target > self.code.len() as i64 {
            bail!(
                ErrorCode::OutOfBounds,
                "jump from {} by {offset:+} leaves the function",
                self.index
            );
        }
        self.index = target as usize;
        Ok(())
    }

    #[inline(always)]
    pub fn is_at_end(&self) -> bool {
        self.index >= self.code.len()
    }
}
