/*
 * error.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Portinaio, an embeddable HTTP/1.x server library.
 *
 * Portinaio is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Portinaio is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Portinaio.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Request and handler errors. Every variant maps to a wire status; the
//! connection worker turns them into an error response and never unwinds.

use std::error::Error;
use std::fmt;

/// Error raised while parsing a request or by a handler.
#[derive(Debug)]
pub enum HttpError {
    /// Malformed request line, header syntax, or body framing.
    BadRequest(String),
    /// POST/PUT/PATCH without Content-Length and not chunked.
    LengthRequired,
    /// No hook matched the request.
    NotFound,
    /// Handler-raised error with a specific HTTP status.
    Status { code: u16, message: String },
    /// Handler-raised non-HTTP error.
    Internal(Box<dyn Error + Send + Sync>),
}

impl HttpError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        HttpError::BadRequest(msg.into())
    }

    pub fn status(code: u16, message: impl Into<String>) -> Self {
        HttpError::Status {
            code,
            message: message.into(),
        }
    }

    pub fn internal(err: impl Error + Send + Sync + 'static) -> Self {
        HttpError::Internal(Box::new(err))
    }

    /// Status code for the wire response.
    pub fn status_code(&self) -> u16 {
        match self {
            HttpError::BadRequest(_) => 400,
            HttpError::LengthRequired => 411,
            HttpError::NotFound => 404,
            HttpError::Status { code, .. } => *code,
            HttpError::Internal(_) => 500,
        }
    }

    /// All error responses close the connection.
    pub fn closes_connection(&self) -> bool {
        true
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpError::BadRequest(m) => write!(f, "bad request: {}", m),
            HttpError::LengthRequired => write!(f, "length required"),
            HttpError::NotFound => write!(f, "not found"),
            HttpError::Status { code, message } => write!(f, "{} {}", code, message),
            HttpError::Internal(e) => write!(f, "internal error: {}", e),
        }
    }
}

impl Error for HttpError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            HttpError::Internal(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for HttpError {
    fn from(e: std::io::Error) -> Self {
        HttpError::Internal(Box::new(e))
    }
}
