use crate::ParseResult;

/// An element that can be parsed off the front of a slice, given whatever
/// dump-wide context (id width, primitive type, nothing) it needs.
pub trait ParseElement: Sized {
    type Ctx: Copy;

    fn parse_element(input: &[u8], ctx: Self::Ctx) -> nom::IResult<&[u8], Self>;
}

/// Common "iterate over n things that need parsing" pattern.
///
/// Fuses after the first parse error: a failed element means the slice is
/// desynchronized, so continuing would only produce garbage.
pub struct CountedIter<'a, T: ParseElement> {
    ctx: T::Ctx,
    remaining: &'a [u8],
    left: u32,
}

impl<'a, T: ParseElement> CountedIter<'a, T> {
    pub(crate) fn new(ctx: T::Ctx, remaining: &'a [u8], count: u32) -> CountedIter<'a, T> {
        CountedIter {
            ctx,
            remaining,
            left: count,
        }
    }
}

impl<'a, T: ParseElement> Iterator for CountedIter<'a, T> {
    type Item = ParseResult<'a, T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.left == 0 {
            return None;
        }

        match T::parse_element(self.remaining, self.ctx) {
            Ok((input, elem)) => {
                self.remaining = input;
                self.left -= 1;
                Some(Ok(elem))
            }
            Err(e) => {
                self.left = 0;
                Some(Err(e))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.left as usize))
    }
}
