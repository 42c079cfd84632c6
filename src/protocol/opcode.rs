//! WebSocket frame opcodes as defined in RFC 6455.

/// WebSocket frame opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
#[non_exhaustive]
pub enum OpCode {
    /// Continuation frame (0x0), follows the first frame of a fragmented message.
    Continuation = 0x0,
    /// Text frame (0x1).
    Text = 0x1,
    /// Binary frame (0x2).
    Binary = 0x2,
    /// Close frame (0x8).
    Close = 0x8,
    /// Ping frame (0x9).
    Ping = 0x9,
    /// Pong frame (0xA).
    Pong = 0xA,
}

impl OpCode {
    /// Close, Ping and Pong. Extensions leave these untouched.
    #[inline]
    #[must_use]
    pub const fn is_control(self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }
}

impl std::fmt::Display for OpCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            OpCode::Continuation => "Continuation",
            OpCode::Text => "Text",
            OpCode::Binary => "Binary",
            OpCode::Close => "Close",
            OpCode::Ping => "Ping",
            OpCode::Pong => "Pong",
        };
        f.write_str(name)
    }
}
