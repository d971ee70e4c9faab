//! End-to-end session traces driving the full engine: framer, response classification, state
//! machine, and outbound rendering.

use imap_engine::{
    client::{
        AppendPart, CommandStreamPart, ContinuationRequest, Response, TaggedCommand,
        TaggedCommandKind, TaggedResponse,
    },
    codec::{ClientCodec, ClientEvent, Fragment, InboundMessage, ResponseDecoder},
    core::{LiteralMode, Tag},
    framing::parse_tag,
    identifier::{set::NonEmptySet, set::UidSet, Uid},
};

/// Classifies frames by shape. A production decoder parses the response grammar; the engine only
/// consumes the variant, so this is all a trace test needs.
#[derive(Debug, Default)]
struct TraceDecoder;

impl ResponseDecoder for TraceDecoder {
    type Error = String;

    fn decode(&mut self, frame: &[u8]) -> Result<InboundMessage, Self::Error> {
        if frame.starts_with(b"+") {
            let data = frame.strip_prefix(b"+ ").unwrap_or(&frame[1..]).to_vec();
            return Ok(InboundMessage::ContinuationRequest(ContinuationRequest {
                data,
            }));
        }

        if frame.starts_with(b"* BYE") {
            return Ok(InboundMessage::Response(Response::Fatal(frame.to_vec())));
        }

        if frame.starts_with(b"*") {
            let is_fetch = frame
                .split(|byte| *byte == b' ')
                .nth(2)
                .map_or(false, |word| word.starts_with(b"FETCH"));

            return Ok(InboundMessage::Response(if is_fetch {
                Response::Fetch(frame.to_vec())
            } else {
                Response::Untagged(frame.to_vec())
            }));
        }

        match parse_tag(frame) {
            Some(tag) => {
                let data = frame[tag.inner().len() + 1..].to_vec();
                Ok(InboundMessage::Response(Response::Tagged(TaggedResponse {
                    tag,
                    data,
                })))
            }
            None => Err(format!("malformed frame: {frame:?}")),
        }
    }
}

fn codec() -> ClientCodec<TraceDecoder> {
    ClientCodec::new(TraceDecoder)
}

fn tag(value: &str) -> Tag {
    Tag::try_from(value).unwrap()
}

fn line(data: &[u8]) -> Fragment {
    Fragment::Line {
        data: data.to_vec(),
    }
}

#[track_caller]
fn assert_outgoing(codec: &mut ClientCodec<TraceDecoder>, expected: &[u8]) {
    assert_eq!(&codec.take_outgoing()[..], expected);
}

#[track_caller]
fn completed_tag(event: &ClientEvent) -> &Tag {
    match event {
        ClientEvent::CommandCompleted(tagged) => &tagged.tag,
        other => panic!("expected a completion, got {other:?}"),
    }
}

#[test]
fn login_session_with_literals() {
    let mut codec = codec();

    // S: greeting
    let events = codec.receive(b"* OK IMAP4rev1 Service Ready\r\n").unwrap();
    assert!(matches!(events[0], ClientEvent::Response(Response::Untagged(_))));

    // C: LOGIN with two synchronizing literals
    codec
        .send(CommandStreamPart::Tagged(TaggedCommand {
            tag: tag("a001"),
            kind: TaggedCommandKind::Ordinary,
            fragments: vec![
                line(b"a001 LOGIN {5}\r\n"),
                Fragment::Literal {
                    data: b"alice".to_vec(),
                    mode: LiteralMode::Sync,
                },
                line(b" {7}\r\n"),
                Fragment::Literal {
                    data: b"secr3t!".to_vec(),
                    mode: LiteralMode::Sync,
                },
                line(b"\r\n"),
            ],
        }))
        .unwrap();
    assert_outgoing(&mut codec, b"a001 LOGIN {5}\r\n");

    assert_eq!(codec.receive(b"+ Ready for literal data\r\n").unwrap(), vec![]);
    assert_outgoing(&mut codec, b"alice {7}\r\n");

    assert_eq!(codec.receive(b"+ Ready for literal data\r\n").unwrap(), vec![]);
    assert_outgoing(&mut codec, b"secr3t!\r\n");

    let events = codec.receive(b"a001 OK LOGIN completed\r\n").unwrap();
    assert_eq!(completed_tag(&events[0]).inner(), "a001");
    assert!(!codec.is_closed());
}

#[test]
fn pipelined_commands_with_untagged_data() {
    let mut codec = codec();

    codec
        .send(CommandStreamPart::Tagged(TaggedCommand {
            tag: tag("a002"),
            kind: TaggedCommandKind::Ordinary,
            fragments: vec![line(b"a002 SELECT INBOX\r\n")],
        }))
        .unwrap();
    codec
        .send(CommandStreamPart::Tagged(TaggedCommand {
            tag: tag("a003"),
            kind: TaggedCommandKind::Ordinary,
            fragments: vec![line(b"a003 UID FETCH 1:* (FLAGS)\r\n")],
        }))
        .unwrap();
    assert_outgoing(&mut codec, b"a002 SELECT INBOX\r\na003 UID FETCH 1:* (FLAGS)\r\n");

    let events = codec
        .receive(
            b"* 18 EXISTS\r\n* FLAGS (\\Answered \\Seen)\r\na002 OK [READ-WRITE] SELECT completed\r\n",
        )
        .unwrap();
    assert_eq!(events.len(), 3);
    assert!(matches!(events[0], ClientEvent::Response(Response::Untagged(_))));
    assert!(matches!(events[1], ClientEvent::Response(Response::Untagged(_))));
    assert_eq!(completed_tag(&events[2]).inner(), "a002");

    let events = codec
        .receive(b"* 1 FETCH (FLAGS (\\Seen) UID 4)\r\na003 OK FETCH completed\r\n")
        .unwrap();
    assert!(matches!(events[0], ClientEvent::Response(Response::Fetch(_))));
    assert_eq!(completed_tag(&events[1]).inner(), "a003");
}

#[test]
fn append_session() {
    let mut codec = codec();

    codec
        .send(CommandStreamPart::Append(AppendPart::Start {
            tag: tag("a004"),
            header: b"APPEND saved-messages".to_vec(),
        }))
        .unwrap();
    codec
        .send(CommandStreamPart::Append(AppendPart::BeginMessage {
            options: b" (\\Seen)".to_vec(),
            size: 15,
            mode: LiteralMode::Sync,
            binary: false,
        }))
        .unwrap();
    assert_outgoing(&mut codec, b"a004 APPEND saved-messages (\\Seen) {15}\r\n");

    let events = codec.receive(b"+ Ready for literal data\r\n").unwrap();
    assert_eq!(events, vec![ClientEvent::AppendReady]);

    codec
        .send(CommandStreamPart::Append(AppendPart::MessageBytes(
            b"Subject: hi".to_vec(),
        )))
        .unwrap();
    codec
        .send(CommandStreamPart::Append(AppendPart::MessageBytes(
            b"\r\n\r\n".to_vec(),
        )))
        .unwrap();
    codec
        .send(CommandStreamPart::Append(AppendPart::EndMessage))
        .unwrap();
    codec
        .send(CommandStreamPart::Append(AppendPart::Finish))
        .unwrap();
    assert_outgoing(&mut codec, b"Subject: hi\r\n\r\n\r\n");

    let events = codec.receive(b"a004 OK APPEND completed\r\n").unwrap();
    assert_eq!(completed_tag(&events[0]).inner(), "a004");
}

#[test]
fn append_catenate_session() {
    let mut codec = codec();

    codec
        .send(CommandStreamPart::Append(AppendPart::Start {
            tag: tag("a005"),
            header: b"APPEND Drafts".to_vec(),
        }))
        .unwrap();
    codec
        .send(CommandStreamPart::Append(AppendPart::BeginCatenate))
        .unwrap();
    codec
        .send(CommandStreamPart::Append(AppendPart::CatenateUrl(
            b"URL \"/Drafts;UIDVALIDITY=385759045/;UID=20\"".to_vec(),
        )))
        .unwrap();
    codec
        .send(CommandStreamPart::Append(AppendPart::CatenateData {
            options: b" TEXT".to_vec(),
            size: 4,
            mode: LiteralMode::Sync,
            binary: false,
        }))
        .unwrap();
    assert_outgoing(
        &mut codec,
        b"a005 APPEND Drafts CATENATE (URL \"/Drafts;UIDVALIDITY=385759045/;UID=20\" TEXT {4}\r\n",
    );

    let events = codec.receive(b"+ go ahead\r\n").unwrap();
    assert_eq!(events, vec![ClientEvent::AppendReady]);

    codec
        .send(CommandStreamPart::Append(AppendPart::MessageBytes(
            b"\r\n--\r\n".to_vec(),
        )))
        .unwrap();
    codec
        .send(CommandStreamPart::Append(AppendPart::EndCatenate))
        .unwrap();
    codec
        .send(CommandStreamPart::Append(AppendPart::Finish))
        .unwrap();
    assert_outgoing(&mut codec, b"\r\n--\r\n)\r\n");

    let events = codec.receive(b"a005 OK CATENATE append completed\r\n").unwrap();
    assert_eq!(completed_tag(&events[0]).inner(), "a005");
}

#[test]
fn authenticate_session() {
    let mut codec = codec();

    codec
        .send(CommandStreamPart::Tagged(TaggedCommand {
            tag: tag("a006"),
            kind: TaggedCommandKind::Authenticate,
            fragments: vec![line(b"a006 AUTHENTICATE PLAIN\r\n")],
        }))
        .unwrap();
    assert_outgoing(&mut codec, b"a006 AUTHENTICATE PLAIN\r\n");

    let events = codec.receive(b"+ \r\n").unwrap();
    assert!(matches!(events[0], ClientEvent::AuthenticationChallenge(_)));

    codec
        .send(CommandStreamPart::ContinuationResponse(
            b"\x00alice\x00secr3t!".to_vec(),
        ))
        .unwrap();
    assert_outgoing(&mut codec, b"AGFsaWNlAHNlY3IzdCE=\r\n");

    let events = codec.receive(b"a006 OK PLAIN authentication successful\r\n").unwrap();
    assert_eq!(completed_tag(&events[0]).inner(), "a006");
}

#[test]
fn idle_session() {
    let mut codec = codec();

    codec
        .send(CommandStreamPart::Tagged(TaggedCommand {
            tag: tag("a007"),
            kind: TaggedCommandKind::Idle,
            fragments: vec![line(b"a007 IDLE\r\n")],
        }))
        .unwrap();
    assert_outgoing(&mut codec, b"a007 IDLE\r\n");

    let events = codec.receive(b"+ idling\r\n").unwrap();
    assert_eq!(events, vec![ClientEvent::IdleConfirmed]);

    // The server pushes data while we idle.
    let events = codec
        .receive(b"* 19 EXISTS\r\n* 19 FETCH (FLAGS (\\Recent))\r\n")
        .unwrap();
    assert!(matches!(events[0], ClientEvent::Response(Response::Untagged(_))));
    assert!(matches!(events[1], ClientEvent::Response(Response::Fetch(_))));

    codec.send(CommandStreamPart::IdleDone).unwrap();
    assert_outgoing(&mut codec, b"DONE\r\n");

    let events = codec.receive(b"a007 OK IDLE terminated\r\n").unwrap();
    assert_eq!(completed_tag(&events[0]).inner(), "a007");
}

#[test]
fn bye_tears_the_session_down() {
    let mut codec = codec();

    let events = codec.receive(b"* BYE Autologout; idle for too long\r\n").unwrap();
    assert!(matches!(events[0], ClientEvent::Response(Response::Fatal(_))));
    assert!(codec.is_closed());

    let error = codec
        .send(CommandStreamPart::Tagged(TaggedCommand {
            tag: tag("a008"),
            kind: TaggedCommandKind::Ordinary,
            fragments: vec![line(b"a008 NOOP\r\n")],
        }))
        .unwrap_err();
    assert!(matches!(error, imap_engine::codec::ClientError::State(_)));
}

#[test]
fn identifier_sets_render_into_commands() {
    // A fetch window: the 3 most recent of the messages we know about.
    let known: UidSet = "1:4,6,20:22".parse().unwrap();
    let window = known.suffix(3);
    assert_eq!(window.to_string(), "20:22");

    let set = NonEmptySet::try_from(window).unwrap();
    let command = format!("a009 UID FETCH {set} (FLAGS)\r\n");
    assert_eq!(command, "a009 UID FETCH 20:22 (FLAGS)\r\n");

    let mut codec = codec();
    codec
        .send(CommandStreamPart::Tagged(TaggedCommand {
            tag: tag("a009"),
            kind: TaggedCommandKind::Ordinary,
            fragments: vec![line(command.as_bytes())],
        }))
        .unwrap();
    assert_outgoing(&mut codec, command.as_bytes());

    // The server answers with UIDs we fold back into the known set.
    let mut known = known;
    known.insert(Uid::from_raw(23).unwrap());
    assert_eq!(known.to_string(), "1:4,6,20:23");
}
