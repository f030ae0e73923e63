//! Built-in curriculum used when no content directory is configured.

/// Label used for the built-in topic in library diagnostics.
pub const SAMPLE_SOURCE: &str = "built-in";

/// A small but complete topic exercising every question type.
pub const SAMPLE_TOPIC: &str = r#"#TOPIC: Caching
#DESC: Cache fundamentals for system design interviews

##CONCEPT: TTL
##PREREQ:
##SUMMARY: Time to live bounds how long a cached entry may be served.
Q: What does TTL stand for?
A) Time To Live
B) Total Time Lapsed
C) Transfer To Local
D) Time To Loop
ANS: A
EXPL: TTL marks how long an entry stays valid before it expires.
TAGS: basics, expiry
VAR: ttl-meaning
---
Q: Which field tells a cache when an entry expires?
A) ETag
B) TTL
C) Content-Length
D) Vary
ANS: B
EXPL: The TTL (or max-age) sets the expiry of the entry.
VAR: ttl-meaning
---
TYPE: FILL
Q: The HTTP Cache-Control directive that sets a TTL in seconds is ____.
BLANK: max-age, s-maxage
ANS: max-age
EXPL: max-age applies to every cache; s-maxage only to shared caches.
---

##CONCEPT: Eviction
##PREREQ: TTL
##SUMMARY: When the cache is full something has to go.
Q: Which policy evicts the least recently used key?
A) FIFO
B) LRU
C) LFU
D) Random
ANS: B
EXPL: LRU tracks recency of access and drops the oldest one.
MISCONCEPT: LFU and LRU are often confused; LFU counts hits, LRU tracks recency.
DIFF: 2
---
TYPE: TWO_STEP
Q: A hot key is read every second but was written a day ago. Under LRU, is it likely to be evicted?
A) Yes
B) No
C) Only with a TTL
D) Only under LFU
ANS: B
REASON: Why?
RA) Eviction looks at write time
RB) Reads refresh recency
RC) Hot keys are pinned
RD) LRU ignores reads
REASON_ANS: RB
EXPL: Every read moves the key to the most recently used end.
---

##CONCEPT: Write Policies
##PREREQ: Eviction
##SUMMARY: How writes reach the cache and the backing store.
TYPE: ORDER
Q: Put the steps of a write-through write in order.
ITEMS:
1) Cache stores the value
2) Client receives the acknowledgement
3) Client sends the write
4) Cache writes to the database
ANS: 3,1,4,2
EXPL: Write-through acknowledges only after the database has the value.
---
Q: Which policy acknowledges a write before the database has it?
A) Write-through
B) Write-around
C) Write-back
D) Read-through
ANS: C
EXPL: Write-back defers the database write and acknowledges early.
---
"#;
