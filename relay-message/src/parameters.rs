use std::{io::IoSlice, iter, str};

use nom::{
    bytes::streaming::{is_not, tag},
    character::streaming::one_of,
    combinator::{map, map_opt, opt},
    multi::many0,
    sequence::{pair, preceded},
    IResult,
};

use crate::MaybeUtf8;

/// The name of an ESMTP `mail-parameter` / `rcpt-parameter`, eg. `SIZE` in
/// `MAIL FROM:<foo@bar> SIZE=1234`.
///
/// Comparisons are case-insensitive, as mandated by RFC 5321 section 4.1.1.11.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct ParameterName<S = String>(pub S);

impl<S> ParameterName<S>
where
    S: AsRef<str>,
{
    pub fn eq_ignore_ascii_case(&self, other: &str) -> bool {
        self.0.as_ref().eq_ignore_ascii_case(other)
    }

    #[inline]
    pub fn as_io_slices(&self) -> impl Iterator<Item = IoSlice> {
        iter::once(IoSlice::new(self.0.as_ref().as_bytes()))
    }
}

impl<S: PartialEq> PartialEq for ParameterName<S> {
    fn eq(&self, o: &Self) -> bool {
        self.0 == o.0
    }
}
impl<S: Eq> Eq for ParameterName<S> {}

impl ParameterName<&str> {
    pub fn to_owned(&self) -> ParameterName<String> {
        ParameterName((*self.0).to_owned())
    }
}

/// A single `mail-parameter` / `rcpt-parameter`, as defined by RFC 5321
/// section 4.1.2, extended with the `BODY=`/`SIZE=`/`SMTPUTF8` keywords from
/// RFC 1870, RFC 1652 and RFC 6531.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Parameter<S = String> {
    pub name: ParameterName<S>,
    pub value: Option<MaybeUtf8<S>>,
}

impl<S: PartialEq> PartialEq for Parameter<S> {
    fn eq(&self, o: &Self) -> bool {
        self.name == o.name && self.value == o.value
    }
}
impl<S: Eq> Eq for Parameter<S> {}

/// The whole space-separated list of parameters following a `MAIL FROM`/`RCPT
/// TO` address, or empty if none were given.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Parameters<S = String>(pub Vec<Parameter<S>>);

impl<S: PartialEq> PartialEq for Parameters<S> {
    fn eq(&self, o: &Self) -> bool {
        self.0 == o.0
    }
}
impl<S: Eq> Eq for Parameters<S> {}

impl<S> Parameters<S> {
    pub fn none() -> Parameters<S> {
        Parameters(Vec::new())
    }

    pub fn get(&self, name: &str) -> Option<&Parameter<S>>
    where
        S: AsRef<str>,
    {
        self.0.iter().find(|p| p.name.eq_ignore_ascii_case(name))
    }
}

impl<S> Parameters<S>
where
    S: AsRef<str>,
{
    #[inline]
    pub fn as_io_slices(&self) -> impl Iterator<Item = IoSlice> {
        self.0.iter().flat_map(|p| {
            iter::once(IoSlice::new(b" "))
                .chain(p.name.as_io_slices())
                .chain(match &p.value {
                    Some(v) => Box::new(iter::once(IoSlice::new(b"=")).chain(v.as_io_slices()))
                        as Box<dyn Iterator<Item = IoSlice>>,
                    None => Box::new(iter::empty()),
                })
        })
    }
}

impl Parameters<&str> {
    pub fn to_owned(&self) -> Parameters<String> {
        Parameters(
            self.0
                .iter()
                .map(|p| Parameter {
                    name: p.name.to_owned(),
                    value: p.value.as_ref().map(|v| match v {
                        MaybeUtf8::Ascii(s) => MaybeUtf8::Ascii((*s).to_owned()),
                        MaybeUtf8::Utf8(s) => MaybeUtf8::Utf8((*s).to_owned()),
                    }),
                })
                .collect(),
        )
    }
}

fn parameter_name(buf: &[u8]) -> IResult<&[u8], &[u8]> {
    is_not(" \t=\r\n")(buf)
}

fn single_parameter<'a, S>(buf: &'a [u8]) -> IResult<&'a [u8], Parameter<S>>
where
    S: From<&'a str>,
{
    map_opt(
        pair(parameter_name, opt(preceded(tag(b"="), is_not(" \t\r\n")))),
        |(name, value): (&[u8], Option<&[u8]>)| {
            let name = str::from_utf8(name).ok()?;
            let value = match value {
                Some(v) => Some(MaybeUtf8::from(str::from_utf8(v).ok()?)),
                None => None,
            };
            Some(Parameter {
                name: ParameterName(name.into()),
                value,
            })
        },
    )(buf)
}

/// Parses a (possibly empty) space-separated `*(SP mail-parameter)` tail.
pub fn parameters<'a, S>(buf: &'a [u8]) -> IResult<&'a [u8], Parameters<S>>
where
    S: From<&'a str>,
{
    map(many0(preceded(one_of(" \t"), single_parameter)), Parameters)(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameters_valid() {
        let tests: &[(&[u8], &[u8], Parameters<&str>)] = &[
            (b"\r\n", b"\r\n", Parameters(vec![])),
            (
                b" SIZE=1234\r\n",
                b"\r\n",
                Parameters(vec![Parameter {
                    name: ParameterName("SIZE"),
                    value: Some(MaybeUtf8::Ascii("1234")),
                }]),
            ),
            (
                b" SIZE=1234 BODY=8BITMIME\r\n",
                b"\r\n",
                Parameters(vec![
                    Parameter {
                        name: ParameterName("SIZE"),
                        value: Some(MaybeUtf8::Ascii("1234")),
                    },
                    Parameter {
                        name: ParameterName("BODY"),
                        value: Some(MaybeUtf8::Ascii("8BITMIME")),
                    },
                ]),
            ),
            (
                b" SMTPUTF8\r\n",
                b"\r\n",
                Parameters(vec![Parameter {
                    name: ParameterName("SMTPUTF8"),
                    value: None,
                }]),
            ),
        ];
        for (inp, rem, out) in tests {
            let (rest, res) = parameters::<&str>(inp).unwrap();
            assert_eq!(rest, *rem);
            assert_eq!(res, *out);
        }
    }
}
