use std::io::IoSlice;

use nom::{
    bytes::streaming::{tag, take_until},
    character::streaming::{digit1, one_of},
    combinator::{map, map_opt, map_res, opt},
    multi::many1,
    sequence::{terminated, tuple},
    IResult,
};

use crate::MaybeUtf8;

/// The 3-digit numeric reply code of RFC 5321 section 4.2.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct ReplyCode {
    code: u16,
}

#[cfg_attr(test, allow(dead_code))]
impl ReplyCode {
    pub const SYSTEM_STATUS: ReplyCode = ReplyCode { code: 211 };
    pub const HELP_MESSAGE: ReplyCode = ReplyCode { code: 214 };
    pub const SERVICE_READY: ReplyCode = ReplyCode { code: 220 };
    pub const CLOSING_CHANNEL: ReplyCode = ReplyCode { code: 221 };
    pub const AUTH_SUCCESSFUL: ReplyCode = ReplyCode { code: 235 };
    pub const OKAY: ReplyCode = ReplyCode { code: 250 };
    pub const USER_NOT_LOCAL_WILL_FORWARD: ReplyCode = ReplyCode { code: 251 };
    pub const CANNOT_VRFY_BUT_PLEASE_TRY: ReplyCode = ReplyCode { code: 252 };
    pub const AUTH_CONTINUE: ReplyCode = ReplyCode { code: 334 };
    pub const START_MAIL_INPUT: ReplyCode = ReplyCode { code: 354 };
    pub const SERVICE_NOT_AVAILABLE: ReplyCode = ReplyCode { code: 421 };
    pub const MAILBOX_TEMPORARILY_UNAVAILABLE: ReplyCode = ReplyCode { code: 450 };
    pub const LOCAL_ERROR: ReplyCode = ReplyCode { code: 451 };
    pub const INSUFFICIENT_STORAGE: ReplyCode = ReplyCode { code: 452 };
    pub const UNABLE_TO_ACCEPT_PARAMETERS: ReplyCode = ReplyCode { code: 455 };
    pub const COMMAND_UNRECOGNIZED: ReplyCode = ReplyCode { code: 500 };
    pub const SYNTAX_ERROR: ReplyCode = ReplyCode { code: 501 };
    pub const COMMAND_UNIMPLEMENTED: ReplyCode = ReplyCode { code: 502 };
    pub const BAD_SEQUENCE: ReplyCode = ReplyCode { code: 503 };
    pub const PARAMETER_UNIMPLEMENTED: ReplyCode = ReplyCode { code: 504 };
    pub const AUTH_REQUIRED: ReplyCode = ReplyCode { code: 530 };
    pub const AUTH_CREDENTIALS_INVALID: ReplyCode = ReplyCode { code: 535 };
    pub const MAILBOX_UNAVAILABLE: ReplyCode = ReplyCode { code: 550 };
    pub const POLICY_REASON: ReplyCode = ReplyCode { code: 550 };
    pub const USER_NOT_LOCAL: ReplyCode = ReplyCode { code: 551 };
    pub const EXCEEDED_STORAGE: ReplyCode = ReplyCode { code: 552 };
    pub const MAILBOX_NAME_INCORRECT: ReplyCode = ReplyCode { code: 553 };
    pub const TRANSACTION_FAILED: ReplyCode = ReplyCode { code: 554 };
    pub const MAIL_OR_RCPT_PARAMETER_UNIMPLEMENTED: ReplyCode = ReplyCode { code: 555 };

    pub fn custom(code: u16) -> ReplyCode {
        assert!(code < 1000);
        ReplyCode { code }
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    /// Classifies this code per the first digit, as defined by RFC 5321
    /// section 4.2.1.
    pub fn kind(&self) -> ReplyCodeKind {
        match self.code / 100 {
            2 => ReplyCodeKind::PositiveCompletion,
            3 => ReplyCodeKind::PositiveIntermediate,
            4 => ReplyCodeKind::TransientNegative,
            5 => ReplyCodeKind::PermanentNegative,
            _ => ReplyCodeKind::Invalid,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplyCodeKind {
    PositiveCompletion,
    PositiveIntermediate,
    TransientNegative,
    PermanentNegative,
    Invalid,
}

/// The `class` digit of an enhanced reply code, per RFC 3463 section 3.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnhancedReplyCodeClass {
    Success,
    TransientFailure,
    PermanentFailure,
}

/// The `subject` digit of an enhanced reply code, per RFC 3463 section 3.2.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnhancedReplyCodeSubject {
    Undefined,
    Addressing,
    Mailbox,
    MailSystem,
    Network,
    MailDelivery,
    Content,
    Policy,
}

/// An RFC 3463 enhanced mail system status code, eg. `2.1.5`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct EnhancedReplyCode {
    pub class: u8,
    pub subject: u16,
    pub detail: u16,
}

impl EnhancedReplyCode {
    pub const SUCCESS_UNDEFINED: EnhancedReplyCode = EnhancedReplyCode::new(2, 0, 0);
    pub const SUCCESS_DEST_VALID: EnhancedReplyCode = EnhancedReplyCode::new(2, 1, 5);
    pub const PERMANENT_UNDEFINED: EnhancedReplyCode = EnhancedReplyCode::new(5, 0, 0);
    pub const PERMANENT_INVALID_COMMAND: EnhancedReplyCode = EnhancedReplyCode::new(5, 5, 1);
    pub const TRANSIENT_UNDEFINED: EnhancedReplyCode = EnhancedReplyCode::new(4, 0, 0);
    pub const TRANSIENT_SYSTEM_INCORRECTLY_CONFIGURED: EnhancedReplyCode =
        EnhancedReplyCode::new(4, 3, 5);

    pub const fn new(class: u8, subject: u16, detail: u16) -> EnhancedReplyCode {
        EnhancedReplyCode {
            class,
            subject,
            detail,
        }
    }

    pub fn class(&self) -> EnhancedReplyCodeClass {
        match self.class {
            2 => EnhancedReplyCodeClass::Success,
            4 => EnhancedReplyCodeClass::TransientFailure,
            _ => EnhancedReplyCodeClass::PermanentFailure,
        }
    }

    pub fn subject(&self) -> EnhancedReplyCodeSubject {
        match self.subject {
            1 => EnhancedReplyCodeSubject::Addressing,
            2 => EnhancedReplyCodeSubject::Mailbox,
            3 => EnhancedReplyCodeSubject::MailSystem,
            4 => EnhancedReplyCodeSubject::Network,
            5 => EnhancedReplyCodeSubject::MailDelivery,
            6 => EnhancedReplyCodeSubject::Content,
            7 => EnhancedReplyCodeSubject::Policy,
            _ => EnhancedReplyCodeSubject::Undefined,
        }
    }

    #[inline]
    pub fn as_io_slices<'a>(&self, buf: &'a mut String) -> impl Iterator<Item = IoSlice<'a>> {
        use std::fmt::Write;
        write!(buf, "{}.{}.{}", self.class, self.subject, self.detail).unwrap();
        std::iter::once(IoSlice::new(buf.as_bytes()))
    }
}

impl std::fmt::Display for EnhancedReplyCode {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.class, self.subject, self.detail)
    }
}

fn reply_code(buf: &[u8]) -> IResult<&[u8], ReplyCode> {
    map_res(nom::bytes::streaming::take(3usize), |digits: &[u8]| {
        std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse::<u16>().ok())
            .filter(|c| *c < 1000)
            .map(ReplyCode::custom)
            .ok_or(())
    })(buf)
}

fn enhanced_reply_code(buf: &[u8]) -> IResult<&[u8], EnhancedReplyCode> {
    map(
        tuple((
            map_res(digit1, |d: &[u8]| std::str::from_utf8(d).unwrap().parse::<u8>()),
            tag(b"."),
            map_res(digit1, |d: &[u8]| std::str::from_utf8(d).unwrap().parse::<u16>()),
            tag(b"."),
            map_res(digit1, |d: &[u8]| std::str::from_utf8(d).unwrap().parse::<u16>()),
        )),
        |(class, _, subject, _, detail)| EnhancedReplyCode::new(class, subject, detail),
    )(buf)
}

/// One line of a (possibly multi-line) SMTP reply, as defined by RFC 5321
/// section 4.2.1: a reply code, a continuation marker, an optional enhanced
/// status code and free text.
fn reply_line<'a, S>(buf: &'a [u8]) -> IResult<&'a [u8], (bool, ReplyCode, Option<EnhancedReplyCode>, MaybeUtf8<S>)>
where
    S: From<&'a str>,
{
    map_opt(
        tuple((
            reply_code,
            map(one_of(" -"), |c| c == ' '),
            opt(terminated(enhanced_reply_code, tag(b" "))),
            terminated(take_until("\r\n"), tag(b"\r\n")),
        )),
        |(code, is_last, ecode, line)| {
            let text = std::str::from_utf8(line).ok()?;
            Some((is_last, code, ecode, MaybeUtf8::from(text)))
        },
    )(buf)
}

/// A (possibly multi-line) SMTP reply, as defined by RFC 5321 section 4.2.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Reply<S = String> {
    pub code: ReplyCode,
    pub ecode: Option<EnhancedReplyCode>,
    pub text: Vec<MaybeUtf8<S>>,
}

impl<S: PartialEq> PartialEq for Reply<S> {
    fn eq(&self, o: &Self) -> bool {
        self.code == o.code && self.ecode == o.ecode && self.text == o.text
    }
}
impl<S: Eq> Eq for Reply<S> {}

impl<'a> Reply<&'a str> {
    /// Parses a full, possibly multi-line, SMTP reply. Every non-final line
    /// must share the first line's reply code, per RFC 5321 section 4.2.1;
    /// mismatches are treated as a parse failure rather than silently
    /// accepted.
    pub fn parse(buf: &'a [u8]) -> IResult<&'a [u8], Reply<&'a str>> {
        let (rem, lines) = many1(reply_line::<&'a str>)(buf)?;
        let (_, code, ecode, _) = lines[0];
        if lines.iter().any(|(_, c, _, _)| *c != code) {
            return Err(nom::Err::Failure(nom::error::make_error(
                buf,
                nom::error::ErrorKind::Verify,
            )));
        }
        let is_complete = lines.last().map(|(is_last, ..)| *is_last).unwrap_or(false);
        if !is_complete {
            return Err(nom::Err::Incomplete(nom::Needed::Unknown));
        }
        Ok((
            rem,
            Reply {
                code,
                ecode,
                text: lines.into_iter().map(|(_, _, _, text)| text).collect(),
            },
        ))
    }

    pub fn into_owned(&self) -> Reply<String> {
        Reply {
            code: self.code,
            ecode: self.ecode,
            text: self
                .text
                .iter()
                .map(|t| match t {
                    MaybeUtf8::Ascii(s) => MaybeUtf8::Ascii((*s).to_owned()),
                    MaybeUtf8::Utf8(s) => MaybeUtf8::Utf8((*s).to_owned()),
                })
                .collect(),
        }
    }
}

impl<S> Reply<S>
where
    S: AsRef<str>,
{
    /// Renders the full wire representation of this reply, including the
    /// `-`/` ` continuation markers and enhanced code prefix on every line.
    pub fn as_io_slices(&self) -> impl Iterator<Item = IoSlice> + '_ {
        let code = format!("{:03}", self.code.code());
        let last = self.text.len().saturating_sub(1);
        self.text.iter().enumerate().flat_map(move |(i, line)| {
            let sep: &'static [u8] = if i == last { b" " } else { b"-" };
            std::iter::once(IoSlice::new(code.as_bytes()))
                .chain(std::iter::once(IoSlice::new(sep)))
                .chain(line.as_io_slices())
                .chain(std::iter::once(IoSlice::new(b"\r\n")))
        })
    }
}

impl<S> std::fmt::Display for Reply<S>
where
    S: AsRef<str>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.code.code())?;
        for line in &self.text {
            let s: &str = match line {
                MaybeUtf8::Ascii(s) => s.as_ref(),
                MaybeUtf8::Utf8(s) => s.as_ref(),
            };
            write!(f, " {}", s)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_single_line() {
        let (rem, r) = Reply::parse(b"250 All is well\r\n").unwrap();
        assert_eq!(rem, b"");
        assert_eq!(r.code, ReplyCode::OKAY);
        assert_eq!(r.code.kind(), ReplyCodeKind::PositiveCompletion);
        assert_eq!(r.text.len(), 1);
    }

    #[test]
    fn reply_multi_line() {
        let (rem, r) = Reply::parse(b"250-first\r\n250-second\r\n250 third\r\n").unwrap();
        assert_eq!(rem, b"");
        assert_eq!(r.text.len(), 3);
        assert_eq!(r.code, ReplyCode::OKAY);
    }

    #[test]
    fn reply_with_enhanced_code() {
        let (rem, r) = Reply::parse(b"550 5.1.1 No such user\r\n").unwrap();
        assert_eq!(rem, b"");
        assert_eq!(r.code, ReplyCode::MAILBOX_UNAVAILABLE);
        assert_eq!(
            r.ecode.unwrap().subject(),
            EnhancedReplyCodeSubject::Mailbox
        );
    }

    #[test]
    fn reply_incomplete() {
        assert!(matches!(
            Reply::parse(b"250-first\r\n"),
            Err(nom::Err::Incomplete(_))
        ));
    }

    #[test]
    fn reply_mismatched_code_rejected() {
        assert!(Reply::parse(b"250-first\r\n251 second\r\n").is_err());
    }
}
